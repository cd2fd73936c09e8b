//! Storage seams: the resource registry, the content store and the two token
//! tables. `postgres` and `content` are the production backends, `memory`
//! implements every trait in-process with the same constraint semantics.

pub mod content;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    ContentHandle, ContentHash, FileAccessToken, FileRef, NewPreviewToken, PreviewToken,
    Resource, ResourceKind, ResourceRef, TenantId,
};

/// Tenant-scoped registry of previewable resources.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Looks up a resource owned by `tenant`. A resource owned by another
    /// tenant is reported as absent.
    async fn find_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<Resource>, StoreError>;

    /// Looks up a resource without a tenant filter.
    async fn get(&self, reference: ResourceRef) -> Result<Option<Resource>, StoreError>;

    async fn resource_files(&self, resource: &Resource) -> Result<Vec<FileRef>, StoreError>;

    async fn find_file(&self, file_id: i64, tenant: TenantId)
        -> Result<Option<FileRef>, StoreError>;
}

/// Content-addressable file storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn by_content_hash(&self, hash: &ContentHash)
        -> Result<Option<ContentHandle>, StoreError>;
}

#[async_trait]
pub trait PreviewTokenStore: Send + Sync {
    /// Oldest token bound to `resource`, forced or not.
    async fn find_for_resource(
        &self,
        resource: ResourceRef,
    ) -> Result<Option<PreviewToken>, StoreError>;

    /// Persists a token. A second non-forced token for the same resource
    /// fails with [`StoreError::Conflict`].
    async fn insert(&self, token: &NewPreviewToken) -> Result<PreviewToken, StoreError>;

    async fn by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<PreviewToken>, StoreError>;

    async fn by_value(
        &self,
        kind: ResourceKind,
        token: Uuid,
    ) -> Result<Option<PreviewToken>, StoreError>;

    /// All tokens of `kind` whose resource belongs to `tenant`. Each call
    /// starts a fresh pass over the store.
    fn for_tenant(
        &self,
        kind: ResourceKind,
        tenant: TenantId,
    ) -> BoxStream<'_, Result<PreviewToken, StoreError>>;

    async fn delete(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait FileAccessTokenStore: Send + Sync {
    /// Inserts all rows of one grant atomically.
    async fn insert_batch(&self, rows: &[FileAccessToken]) -> Result<(), StoreError>;

    async fn find(
        &self,
        token: Uuid,
        hash: &ContentHash,
    ) -> Result<Option<FileAccessToken>, StoreError>;

    /// Sets `requested_on = at` if the row is unredeemed and not expired at
    /// `at`. Returns whether this call won the redemption.
    async fn mark_requested(
        &self,
        token: Uuid,
        hash: &ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Deletes every row with `valid_until < now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Persistence handle built once at startup and passed to every manager.
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn ResourceRegistry>,
    pub content: Arc<dyn ContentStore>,
    pub preview_tokens: Arc<dyn PreviewTokenStore>,
    pub file_tokens: Arc<dyn FileAccessTokenStore>,
}

impl Backend {
    pub fn postgres(db: postgres::PgStore, content: Arc<dyn ContentStore>) -> Self {
        let db = Arc::new(db);
        Self {
            registry: db.clone(),
            content,
            preview_tokens: db.clone(),
            file_tokens: db,
        }
    }

    pub fn memory(store: Arc<memory::MemoryStore>, content: Arc<memory::MemoryContentStore>) -> Self {
        Self {
            registry: store.clone(),
            content,
            preview_tokens: store.clone(),
            file_tokens: store,
        }
    }
}
