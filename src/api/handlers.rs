use std::sync::Arc;

use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{parse_kind, AppJson};
use super::tenant::Tenant;
use crate::errors::AppError;
use crate::models::token::encode_token;
use crate::models::PreviewToken;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateTokenRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<i64>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateTokenResponse {
    pub token: String,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /token: return the preview token for a resource, minting one when
/// none exists or `force` is set.
pub async fn generate_token(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    AppJson(payload): AppJson<GenerateTokenRequest>,
) -> Result<Json<GenerateTokenResponse>, AppError> {
    let raw_kind = payload.kind.ok_or(AppError::MissingField("type"))?;
    let id = payload.id.ok_or(AppError::MissingField("id"))?;
    let kind = parse_kind(&raw_kind)?;

    let generated = state.previews.generate(kind, id, tenant, payload.force).await?;
    let token = state.previews.save(generated).await?;

    Ok(Json(GenerateTokenResponse {
        token: encode_token(token.token),
    }))
}

/// GET /token/:kind: every token of that kind owned by the caller's tenant.
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path(kind): Path<String>,
) -> Result<Json<Vec<PreviewToken>>, AppError> {
    let kind = parse_kind(&kind)?;
    let tokens: Vec<PreviewToken> = state.previews.for_tenant(kind, tenant).try_collect().await?;
    Ok(Json(tokens))
}

/// DELETE /token/:kind/:id
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    // A non-numeric id can never name a token.
    let Path((kind, id)) = path.map_err(|_| AppError::TokenNotFound)?;
    let kind = parse_kind(&kind)?;
    state.previews.delete(kind, id, tenant).await?;
    Ok(Json(json!({ "message": "Token deleted." })))
}
