//! Public endpoints authorized by a token in the query string rather than by
//! tenant identity.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::PathRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::parse_kind;
use crate::errors::AppError;
use crate::models::token::{encode_token, parse_token_value};
use crate::models::{ContentHandle, ContentHash};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
    /// Presence alone selects a chunked response; the value is ignored.
    pub stream: Option<String>,
}

/// GET /file/:hash?token=..[&stream]: redeem a file access token.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let hash = ContentHash::parse(&hash).map_err(|_| AppError::unauthorized())?;
    let token = query
        .token
        .as_deref()
        .and_then(parse_token_value)
        .ok_or_else(AppError::unauthorized)?;

    let handle = state.files.redeem(token, &hash).await?;
    Ok(content_response(handle, query.stream.is_some(), None))
}

/// GET /preview/:kind?token=..: the presentation of the resource unlocked by
/// a preview token, with a fresh file access token covering its files.
pub async fn get_preview(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let kind = parse_kind(&kind)?;
    if !accepts_json(&headers) {
        return Err(AppError::InvalidContentType);
    }

    let token = query.token.as_deref().ok_or_else(AppError::unauthorized)?;
    let resource = state.gate.authorize_resource_preview(kind, token).await?;
    let presentation = state.gate.presentation(resource).await?;
    let file_token = state.files.grant_for_files(&presentation.files).await?;

    Ok(Json(json!({
        "type": presentation.resource.reference.kind(),
        "id": presentation.resource.reference.id(),
        "files": presentation.files,
        "filePreviewToken": encode_token(file_token),
    })))
}

/// GET /preview/:kind/file/:file_id?token=..: one file of the presentation
/// unlocked by a preview token.
pub async fn get_presentation_file(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, i64)>, PathRejection>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    // A non-numeric file id is never part of a presentation.
    let Path((kind, file_id)) = path.map_err(|_| AppError::unauthorized())?;
    let kind = parse_kind(&kind)?;
    let token = query.token.as_deref().ok_or_else(AppError::unauthorized)?;
    let file = state.gate.authorize_file_access(kind, token, file_id).await?;

    let hash = file
        .content_hash
        .as_ref()
        .ok_or_else(|| AppError::ContentStore(format!("file {} has no indexed content", file.id)))?;
    let handle = state
        .content
        .by_content_hash(hash)
        .await?
        .ok_or_else(|| AppError::ContentStore(format!("no content for {}", hash)))?;

    Ok(content_response(handle, query.stream.is_some(), Some(&file.name)))
}

fn content_response(handle: ContentHandle, stream: bool, filename: Option<&str>) -> Response {
    let len = handle.len();
    let mut resp = if stream {
        Body::from_stream(handle.into_stream()).into_response()
    } else {
        let mut resp = handle.into_bytes().into_response();
        resp.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        resp
    };

    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    let disposition = match filename {
        Some(name) => HeaderValue::from_str(&format!("inline; filename=\"{}\"", name.replace('"', "")))
            .unwrap_or(HeaderValue::from_static("inline")),
        None => HeaderValue::from_static("inline"),
    };
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    resp
}

/// JSON is the only rendering; a missing Accept header means anything goes.
fn accepts_json(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT) else {
        return true;
    };
    let Ok(accept) = accept.to_str() else {
        return false;
    };
    accept.split(',').any(|part| {
        let media = part.split(';').next().unwrap_or("").trim();
        matches!(media, "application/json" | "application/*" | "*/*")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::ACCEPT, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_accepts_json_without_header() {
        assert!(accepts_json(&HeaderMap::new()));
    }

    #[test]
    fn test_accepts_json_with_parameters_and_wildcards() {
        assert!(accepts_json(&accept("application/json")));
        assert!(accepts_json(&accept("text/html, application/json;q=0.9")));
        assert!(accepts_json(&accept("*/*")));
    }

    #[test]
    fn test_rejects_xml_only() {
        assert!(!accepts_json(&accept("application/xml")));
        assert!(!accepts_json(&accept("text/html")));
    }
}
