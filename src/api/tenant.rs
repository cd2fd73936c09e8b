use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::AppError;
use crate::models::TenantId;

/// Header carrying the tenant identity resolved by the upstream auth proxy.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Extractor for the tenant a management request acts on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok());

        match raw.map(str::parse::<TenantId>) {
            Some(Ok(tenant)) => Ok(Tenant(tenant)),
            Some(Err(_)) => {
                tracing::warn!("malformed X-Tenant-Id header");
                Err(AppError::unauthorized())
            }
            None => {
                tracing::warn!("missing X-Tenant-Id header");
                Err(AppError::unauthorized())
            }
        }
    }
}
