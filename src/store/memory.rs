//! In-process backend. Mirrors the Postgres schema's constraints: cascade
//! deletes from resources to their tokens, one non-forced token per resource,
//! and unique (token, content hash) pairs for file access rows.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ContentStore, FileAccessTokenStore, PreviewTokenStore, ResourceRegistry};
use crate::errors::StoreError;
use crate::models::{
    ContentHandle, ContentHash, FileAccessToken, FileRef, NewPreviewToken, PreviewToken,
    Resource, ResourceKind, ResourceRef, TenantId,
};

#[derive(Default)]
struct State {
    next_id: i64,
    resources: HashMap<ResourceRef, TenantId>,
    files: BTreeMap<i64, FileRef>,
    resource_files: HashMap<ResourceRef, Vec<i64>>,
    preview_tokens: BTreeMap<i64, PreviewToken>,
    file_tokens: HashMap<(Uuid, ContentHash), FileAccessToken>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn owner(&self, reference: ResourceRef) -> Option<TenantId> {
        self.resources.get(&reference).copied()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Registry seeding --

    pub async fn add_resource(&self, kind: ResourceKind, tenant: TenantId) -> Resource {
        let mut state = self.state.write().await;
        let reference = ResourceRef::new(kind, state.next_id());
        state.resources.insert(reference, tenant);
        Resource { reference, tenant }
    }

    /// Registers a resource under a caller-chosen id.
    pub async fn insert_resource(&self, reference: ResourceRef, tenant: TenantId) -> Resource {
        let mut state = self.state.write().await;
        state.resources.insert(reference, tenant);
        Resource { reference, tenant }
    }

    pub async fn add_file(
        &self,
        tenant: TenantId,
        name: &str,
        content_hash: Option<ContentHash>,
    ) -> FileRef {
        let mut state = self.state.write().await;
        let file = FileRef {
            id: state.next_id(),
            tenant,
            name: name.to_string(),
            content_hash,
        };
        state.files.insert(file.id, file.clone());
        file
    }

    pub async fn attach_file(&self, resource: ResourceRef, file_id: i64) {
        let mut state = self.state.write().await;
        let files = state.resource_files.entry(resource).or_default();
        if !files.contains(&file_id) {
            files.push(file_id);
        }
    }

    /// Moves a resource to another tenant.
    pub async fn transfer_resource(&self, reference: ResourceRef, tenant: TenantId) {
        let mut state = self.state.write().await;
        if let Some(owner) = state.resources.get_mut(&reference) {
            *owner = tenant;
        }
    }

    /// Removes a resource, cascading to its tokens and file links.
    pub async fn remove_resource(&self, reference: ResourceRef) -> bool {
        let mut state = self.state.write().await;
        let removed = state.resources.remove(&reference).is_some();
        state.resource_files.remove(&reference);
        state.preview_tokens.retain(|_, t| t.resource != reference);
        removed
    }

    pub async fn file_token_count(&self) -> usize {
        self.state.read().await.file_tokens.len()
    }
}

#[async_trait]
impl ResourceRegistry for MemoryStore {
    async fn find_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<Resource>, StoreError> {
        let reference = ResourceRef::new(kind, id);
        let state = self.state.read().await;
        Ok(state
            .owner(reference)
            .filter(|owner| *owner == tenant)
            .map(|tenant| Resource { reference, tenant }))
    }

    async fn get(&self, reference: ResourceRef) -> Result<Option<Resource>, StoreError> {
        let state = self.state.read().await;
        Ok(state.owner(reference).map(|tenant| Resource { reference, tenant }))
    }

    async fn resource_files(&self, resource: &Resource) -> Result<Vec<FileRef>, StoreError> {
        let state = self.state.read().await;
        let ids = state
            .resource_files
            .get(&resource.reference)
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.files.get(&id).cloned())
            .collect())
    }

    async fn find_file(
        &self,
        file_id: i64,
        tenant: TenantId,
    ) -> Result<Option<FileRef>, StoreError> {
        let state = self.state.read().await;
        Ok(state.files.get(&file_id).filter(|f| f.tenant == tenant).cloned())
    }
}

#[async_trait]
impl PreviewTokenStore for MemoryStore {
    async fn find_for_resource(
        &self,
        resource: ResourceRef,
    ) -> Result<Option<PreviewToken>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .preview_tokens
            .values()
            .find(|t| t.resource == resource)
            .cloned())
    }

    async fn insert(&self, token: &NewPreviewToken) -> Result<PreviewToken, StoreError> {
        let mut state = self.state.write().await;
        if state.owner(token.resource).is_none() {
            return Err(StoreError::MissingReference);
        }
        let clash = state.preview_tokens.values().any(|t| {
            t.token == token.token || (!token.forced && !t.forced && t.resource == token.resource)
        });
        if clash {
            return Err(StoreError::Conflict);
        }
        let row = PreviewToken {
            id: state.next_id(),
            token: token.token,
            resource: token.resource,
            forced: token.forced,
            created_at: Utc::now(),
        };
        state.preview_tokens.insert(row.id, row.clone());
        Ok(row)
    }

    async fn by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<PreviewToken>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .preview_tokens
            .get(&id)
            .filter(|t| t.kind() == kind && state.owner(t.resource) == Some(tenant))
            .cloned())
    }

    async fn by_value(
        &self,
        kind: ResourceKind,
        token: Uuid,
    ) -> Result<Option<PreviewToken>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .preview_tokens
            .values()
            .find(|t| t.token == token && t.kind() == kind)
            .cloned())
    }

    fn for_tenant(
        &self,
        kind: ResourceKind,
        tenant: TenantId,
    ) -> BoxStream<'_, Result<PreviewToken, StoreError>> {
        stream::once(async move {
            let state = self.state.read().await;
            let rows: Vec<Result<PreviewToken, StoreError>> = state
                .preview_tokens
                .values()
                .filter(|t| t.kind() == kind && state.owner(t.resource) == Some(tenant))
                .cloned()
                .map(Ok)
                .collect();
            stream::iter(rows)
        })
        .flatten()
        .boxed()
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let owned = state
            .preview_tokens
            .get(&id)
            .is_some_and(|t| t.kind() == kind && state.owner(t.resource) == Some(tenant));
        if owned {
            state.preview_tokens.remove(&id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl FileAccessTokenStore for MemoryStore {
    async fn insert_batch(&self, rows: &[FileAccessToken]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            let key = (row.token, row.content_hash.clone());
            if state.file_tokens.contains_key(&key) || !seen.insert(key) {
                return Err(StoreError::Conflict);
            }
        }
        for row in rows {
            state
                .file_tokens
                .insert((row.token, row.content_hash.clone()), row.clone());
        }
        Ok(())
    }

    async fn find(
        &self,
        token: Uuid,
        hash: &ContentHash,
    ) -> Result<Option<FileAccessToken>, StoreError> {
        let state = self.state.read().await;
        Ok(state.file_tokens.get(&(token, hash.clone())).cloned())
    }

    async fn mark_requested(
        &self,
        token: Uuid,
        hash: &ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.file_tokens.get_mut(&(token, hash.clone())) {
            Some(row) if row.requested_on.is_none() && !row.is_expired(at) => {
                row.requested_on = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.file_tokens.len();
        state.file_tokens.retain(|_, row| !row.is_expired(now));
        Ok((before - state.file_tokens.len()) as u64)
    }
}

/// Content store holding bytes in memory, keyed by their SHA-256 digest.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: DashMap<ContentHash, Bytes>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, data: impl Into<Bytes>) -> ContentHash {
        let data = data.into();
        let hash = ContentHash::digest(&data);
        self.blobs.insert(hash.clone(), data);
        hash
    }

    pub fn remove(&self, hash: &ContentHash) -> bool {
        self.blobs.remove(hash).is_some()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<ContentHandle>, StoreError> {
        Ok(self
            .blobs
            .get(hash)
            .map(|entry| ContentHandle::new(hash.clone(), entry.value().clone())))
    }
}
