use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::ResourceKind;
use crate::AppState;

pub mod handlers;
pub mod preview;
pub mod tenant;

pub const UPSTREAM_KEY_HEADER: &str = "x-upstream-key";

/// Build the full HTTP surface.
///
/// Token management routes act on behalf of the tenant injected by the
/// upstream auth proxy. Preview and file routes are authorized by the token
/// in their query string alone.
pub fn router(state: Arc<AppState>) -> Router {
    let management = Router::new()
        .route("/token", post(handlers::generate_token))
        .route("/token/:kind", get(handlers::list_tokens))
        .route("/token/:kind/:id", delete(handlers::delete_token))
        .layer(middleware::from_fn_with_state(state.clone(), upstream_auth));

    let public = Router::new()
        .route("/file/:hash", get(preview::get_file))
        .route("/preview/:kind", get(preview::get_preview))
        .route("/preview/:kind/file/:file_id", get(preview::get_presentation_file));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(management)
        .merge(public)
        .fallback(fallback_404)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(security_headers_middleware))
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http()),
        )
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// `Json` whose rejections render through [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

pub(crate) fn parse_kind(raw: &str) -> Result<ResourceKind, AppError> {
    raw.parse()
        .map_err(|_| AppError::InvalidTokenKind(raw.to_string()))
}

/// Middleware: validates `X-Upstream-Key` against the configured shared
/// secret. A no-op when no key is configured.
async fn upstream_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.upstream_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(UPSTREAM_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("management API: invalid upstream key");
            Err(AppError::unauthorized())
        }
        None => {
            tracing::warn!("management API: missing X-Upstream-Key header");
            Err(AppError::unauthorized())
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

    // Previewed content and token listings must not be cached.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    // Tokens travel in query strings; keep them out of Referer headers.
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));

    headers.remove("Server");

    resp
}
