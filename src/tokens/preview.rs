use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};

use crate::errors::{AppError, StoreError};
use crate::models::token::token_prefix;
use crate::models::{Generated, NewPreviewToken, PreviewToken, ResourceKind, TenantId};
use crate::store::{PreviewTokenStore, ResourceRegistry};

/// Issues and looks up tenant-scoped preview tokens. Tokens stay valid until
/// they, or their resource, are deleted.
#[derive(Clone)]
pub struct PreviewTokenManager {
    registry: Arc<dyn ResourceRegistry>,
    tokens: Arc<dyn PreviewTokenStore>,
}

impl PreviewTokenManager {
    pub fn new(registry: Arc<dyn ResourceRegistry>, tokens: Arc<dyn PreviewTokenStore>) -> Self {
        Self { registry, tokens }
    }

    /// Returns the token for a resource owned by `tenant`.
    ///
    /// Without `force`, an existing token for the resource is returned as is.
    /// Otherwise a fresh token is minted; it must go through [`Self::save`]
    /// before its value is handed out.
    pub async fn generate(
        &self,
        kind: ResourceKind,
        resource_id: i64,
        tenant: TenantId,
        force: bool,
    ) -> Result<Generated, AppError> {
        // Foreign-owned and missing resources are indistinguishable here.
        let resource = self
            .registry
            .find_by_id(kind, resource_id, tenant)
            .await?
            .ok_or(AppError::ResourceNotFound(kind))?;

        if !force {
            if let Some(existing) = self.tokens.find_for_resource(resource.reference).await? {
                return Ok(Generated::Existing(existing));
            }
        }

        Ok(Generated::Fresh(NewPreviewToken::new(resource.reference, force)))
    }

    pub async fn save(&self, generated: Generated) -> Result<PreviewToken, AppError> {
        let fresh = match generated {
            Generated::Existing(token) => return Ok(token),
            Generated::Fresh(fresh) => fresh,
        };

        let kind = fresh.resource.kind();
        let token = self.tokens.insert(&fresh).await.map_err(|e| match e {
            StoreError::MissingReference => AppError::ResourceNotFound(kind),
            StoreError::Conflict => {
                tracing::warn!(
                    resource = %fresh.resource,
                    "concurrent preview token generation rejected by unique constraint"
                );
                AppError::TokenConflict
            }
            other => other.into(),
        })?;

        tracing::info!(
            resource = %token.resource,
            token = %token_prefix(token.token),
            forced = token.forced,
            "preview token created"
        );
        Ok(token)
    }

    /// Generates and persists in one step.
    pub async fn issue(
        &self,
        kind: ResourceKind,
        resource_id: i64,
        tenant: TenantId,
        force: bool,
    ) -> Result<PreviewToken, AppError> {
        let generated = self.generate(kind, resource_id, tenant, force).await?;
        self.save(generated).await
    }

    pub async fn by_id(
        &self,
        kind: ResourceKind,
        token_id: i64,
        tenant: TenantId,
    ) -> Result<PreviewToken, AppError> {
        self.tokens
            .by_id(kind, token_id, tenant)
            .await?
            .ok_or(AppError::TokenNotFound)
    }

    pub fn for_tenant(
        &self,
        kind: ResourceKind,
        tenant: TenantId,
    ) -> BoxStream<'_, Result<PreviewToken, AppError>> {
        self.tokens
            .for_tenant(kind, tenant)
            .map(|row| row.map_err(AppError::from))
            .boxed()
    }

    pub async fn delete(
        &self,
        kind: ResourceKind,
        token_id: i64,
        tenant: TenantId,
    ) -> Result<(), AppError> {
        if !self.tokens.delete(kind, token_id, tenant).await? {
            return Err(AppError::TokenNotFound);
        }
        tracing::info!(kind = %kind, id = token_id, tenant = %tenant, "preview token deleted");
        Ok(())
    }
}
