use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::ResourceKind;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated")]
    Conflict,

    /// A foreign key pointed at a row that no longer exists.
    #[error("referenced row does not exist")]
    MissingReference,

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("storage error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Conflict;
            }
            if db.is_foreign_key_violation() {
                return StoreError::MissingReference;
            }
        }
        StoreError::Database(e)
    }
}

/// Request-facing errors. Each variant maps to a fixed status and a stable
/// machine-readable code.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad, missing, expired or spent token, or a cross-tenant access attempt.
    /// `files` lists the file ids the presentation does allow, when known.
    #[error("preview not allowed")]
    Unauthorized { files: Option<Vec<i64>> },

    #[error("no such preview object: {0}")]
    ResourceNotFound(ResourceKind),

    #[error("no such token")]
    TokenNotFound,

    #[error("invalid token type: {0}")]
    InvalidTokenKind(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid content type")]
    InvalidContentType,

    #[error("token already exists for this resource")]
    TokenConflict,

    #[error("content store error: {0}")]
    ContentStore(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn unauthorized() -> Self {
        AppError::Unauthorized { files: None }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AppError::TokenConflict,
            StoreError::MissingReference => AppError::unauthorized(),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

/// Unreadable, non-JSON or mistyped bodies all surface as a missing body.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("rejected request body: {}", rejection.body_text());
        AppError::MissingField("body")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized { .. } => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "Preview not allowed.".to_string(),
            ),
            AppError::ResourceNotFound(_) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "no_such_object",
                "No such preview object.".to_string(),
            ),
            AppError::TokenNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "no_such_token",
                "No such token.".to_string(),
            ),
            AppError::InvalidTokenKind(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_token_type",
                "Invalid token type.".to_string(),
            ),
            AppError::MissingField(field) => {
                let (code, msg) = match *field {
                    "type" => ("missing_token_type", "Missing token type.".to_string()),
                    "id" => ("missing_identifier", "Missing identifier.".to_string()),
                    "body" => ("missing_field", "Missing or malformed request body.".to_string()),
                    other => ("missing_field", format!("Missing field: {}.", other)),
                };
                (StatusCode::BAD_REQUEST, "invalid_request_error", code, msg)
            }
            AppError::InvalidContentType => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_content_type",
                "Invalid content type.".to_string(),
            ),
            AppError::TokenConflict => (
                StatusCode::CONFLICT,
                "conflict_error",
                "token_conflict",
                "A token for this resource was created concurrently.".to_string(),
            ),
            AppError::ContentStore(e) => {
                tracing::error!("Content store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "content_store_error",
                    "File not available.".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        });

        // Lets clients discover which files a presentation allows.
        if let AppError::Unauthorized { files: Some(files) } = &self {
            body["files"] = json!(files);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (AppError::unauthorized(), StatusCode::UNAUTHORIZED),
            (AppError::ResourceNotFound(ResourceKind::Group), StatusCode::NOT_FOUND),
            (AppError::TokenNotFound, StatusCode::NOT_FOUND),
            (AppError::InvalidTokenKind("x".into()), StatusCode::BAD_REQUEST),
            (AppError::MissingField("type"), StatusCode::BAD_REQUEST),
            (AppError::TokenConflict, StatusCode::CONFLICT),
            (AppError::ContentStore("gone".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_unauthorized_reports_allowed_files() {
        let resp = AppError::Unauthorized { files: Some(vec![1, 2]) }.into_response();
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "unauthorized");
        assert_eq!(json["files"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_unauthorized_without_files_omits_key() {
        let json = body_json(AppError::unauthorized().into_response()).await;
        assert!(json.get("files").is_none());
    }

    #[tokio::test]
    async fn test_missing_field_messages() {
        let json = body_json(AppError::MissingField("id").into_response()).await;
        assert_eq!(json["error"]["message"], "Missing identifier.");
        let json = body_json(AppError::MissingField("type").into_response()).await;
        assert_eq!(json["error"]["code"], "missing_token_type");
    }

    #[tokio::test]
    async fn test_malformed_body_message() {
        let json = body_json(AppError::MissingField("body").into_response()).await;
        assert_eq!(json["error"]["code"], "missing_field");
        assert_eq!(json["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_store_conflict_maps_to_token_conflict() {
        assert!(matches!(AppError::from(StoreError::Conflict), AppError::TokenConflict));
        assert!(matches!(
            AppError::from(StoreError::MissingReference),
            AppError::Unauthorized { files: None }
        ));
    }
}
