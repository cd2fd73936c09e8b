//! Request-time authorization for preview and presentation file access.

use std::sync::Arc;

use crate::errors::AppError;
use crate::models::token::parse_token_value;
use crate::models::{FileRef, Presentation, Resource, ResourceKind};
use crate::store::{PreviewTokenStore, ResourceRegistry};

#[derive(Clone)]
pub struct AccessGate {
    registry: Arc<dyn ResourceRegistry>,
    tokens: Arc<dyn PreviewTokenStore>,
}

impl AccessGate {
    pub fn new(registry: Arc<dyn ResourceRegistry>, tokens: Arc<dyn PreviewTokenStore>) -> Self {
        Self { registry, tokens }
    }

    /// Resolves a preview token value to the resource it unlocks. Preview
    /// tokens do not expire; a deleted resource takes its tokens with it.
    pub async fn authorize_resource_preview(
        &self,
        kind: ResourceKind,
        token_value: &str,
    ) -> Result<Resource, AppError> {
        let token = parse_token_value(token_value).ok_or_else(AppError::unauthorized)?;
        let preview = self
            .tokens
            .by_value(kind, token)
            .await?
            .ok_or_else(AppError::unauthorized)?;

        self.registry
            .get(preview.resource)
            .await?
            .ok_or_else(AppError::unauthorized)
    }

    pub async fn presentation(&self, resource: Resource) -> Result<Presentation, AppError> {
        let files = self.registry.resource_files(&resource).await?;
        Ok(Presentation { resource, files })
    }

    /// Authorizes access to one file of the presentation unlocked by
    /// `token_value`.
    pub async fn authorize_file_access(
        &self,
        kind: ResourceKind,
        token_value: &str,
        file_id: i64,
    ) -> Result<FileRef, AppError> {
        let resource = self.authorize_resource_preview(kind, token_value).await?;
        let presentation = self.presentation(resource).await?;
        self.authorize_presentation_file(&presentation, file_id).await
    }

    /// Checks `file_id` against the presentation's file set, then resolves it
    /// within the presentation's tenant.
    pub async fn authorize_presentation_file(
        &self,
        presentation: &Presentation,
        file_id: i64,
    ) -> Result<FileRef, AppError> {
        if !presentation.contains(file_id) {
            return Err(AppError::Unauthorized {
                files: Some(presentation.file_ids()),
            });
        }

        self.registry
            .find_file(file_id, presentation.resource.tenant)
            .await?
            .ok_or_else(AppError::unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::encode_token;
    use crate::models::TenantId;
    use crate::store::memory::MemoryStore;
    use crate::tokens::PreviewTokenManager;

    struct Fixture {
        store: Arc<MemoryStore>,
        tokens: PreviewTokenManager,
        gate: AccessGate,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            tokens: PreviewTokenManager::new(store.clone(), store.clone()),
            gate: AccessGate::new(store.clone(), store.clone()),
            store,
        }
    }

    #[tokio::test]
    async fn test_preview_token_unlocks_its_resource() {
        let f = fixture();
        let r = f.store.add_resource(ResourceKind::Group, TenantId(2)).await;
        let t = f.tokens.issue(ResourceKind::Group, r.reference.id(), TenantId(2), false).await.unwrap();

        let resource = f
            .gate
            .authorize_resource_preview(ResourceKind::Group, &encode_token(t.token))
            .await
            .unwrap();
        assert_eq!(resource, r);
    }

    #[tokio::test]
    async fn test_bad_token_values_are_unauthorized() {
        let f = fixture();
        let r = f.store.add_resource(ResourceKind::Deployment, TenantId(2)).await;
        let t = f.tokens.issue(ResourceKind::Deployment, r.reference.id(), TenantId(2), false).await.unwrap();

        let unknown = encode_token(uuid::Uuid::new_v4());
        for value in ["", "garbage", unknown.as_str()] {
            assert!(matches!(
                f.gate.authorize_resource_preview(ResourceKind::Deployment, value).await.unwrap_err(),
                AppError::Unauthorized { files: None }
            ));
        }
        // token of another kind
        assert!(f
            .gate
            .authorize_resource_preview(ResourceKind::Group, &encode_token(t.token))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_deleted_resource_makes_token_unreachable() {
        let f = fixture();
        let r = f.store.add_resource(ResourceKind::Deployment, TenantId(1)).await;
        let t = f.tokens.issue(ResourceKind::Deployment, r.reference.id(), TenantId(1), false).await.unwrap();
        f.store.remove_resource(r.reference).await;

        assert!(matches!(
            f.gate
                .authorize_resource_preview(ResourceKind::Deployment, &encode_token(t.token))
                .await
                .unwrap_err(),
            AppError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_file_outside_presentation_reports_allowed_files() {
        let f = fixture();
        let tenant = TenantId(4);
        let r = f.store.add_resource(ResourceKind::Deployment, tenant).await;
        let a = f.store.add_file(tenant, "a.png", None).await;
        let b = f.store.add_file(tenant, "b.png", None).await;
        let stray = f.store.add_file(tenant, "stray.png", None).await;
        f.store.attach_file(r.reference, a.id).await;
        f.store.attach_file(r.reference, b.id).await;
        let t = f.tokens.issue(ResourceKind::Deployment, r.reference.id(), tenant, false).await.unwrap();
        let value = encode_token(t.token);

        let file = f.gate.authorize_file_access(ResourceKind::Deployment, &value, b.id).await.unwrap();
        assert_eq!(file, b);

        match f.gate.authorize_file_access(ResourceKind::Deployment, &value, stray.id).await {
            Err(AppError::Unauthorized { files: Some(files) }) => assert_eq!(files, vec![a.id, b.id]),
            other => panic!("expected unauthorized with files, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_foreign_file_in_presentation_is_unauthorized() {
        let f = fixture();
        let r = f.store.add_resource(ResourceKind::Group, TenantId(1)).await;
        let foreign = f.store.add_file(TenantId(2), "foreign.pdf", None).await;
        f.store.attach_file(r.reference, foreign.id).await;
        let t = f.tokens.issue(ResourceKind::Group, r.reference.id(), TenantId(1), false).await.unwrap();

        assert!(matches!(
            f.gate
                .authorize_file_access(ResourceKind::Group, &encode_token(t.token), foreign.id)
                .await
                .unwrap_err(),
            AppError::Unauthorized { files: None }
        ));
    }
}
