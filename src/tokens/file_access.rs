use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::AppError;
use crate::models::token::token_prefix;
use crate::models::{ContentHandle, ContentHash, FileAccessToken, FileRef, Resource};
use crate::store::{ContentStore, FileAccessTokenStore, ResourceRegistry};

/// Whether a (token, hash) pair may be redeemed more than once before it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedemptionMode {
    #[default]
    SingleUse,
    Reusable,
}

impl FromStr for RedemptionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single-use" => Ok(RedemptionMode::SingleUse),
            "reusable" => Ok(RedemptionMode::Reusable),
            other => anyhow::bail!("invalid redemption mode: {} (expected single-use or reusable)", other),
        }
    }
}

impl fmt::Display for RedemptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RedemptionMode::SingleUse => "single-use",
            RedemptionMode::Reusable => "reusable",
        })
    }
}

/// Grants short-lived access to content hashes, batched under one shared
/// token value per grant, and redeems those grants per hash.
///
/// Expired rows are swept on every grant and redeem. The sweep only reclaims
/// space: `redeem` checks `valid_until` itself, so an expired row that
/// survived a sweep is still refused.
#[derive(Clone)]
pub struct FileAccessTokenManager {
    tokens: Arc<dyn FileAccessTokenStore>,
    registry: Arc<dyn ResourceRegistry>,
    content: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    validity: Duration,
    mode: RedemptionMode,
}

impl FileAccessTokenManager {
    pub fn new(
        tokens: Arc<dyn FileAccessTokenStore>,
        registry: Arc<dyn ResourceRegistry>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            tokens,
            registry,
            content,
            clock: Arc::new(SystemClock),
            validity: Duration::minutes(5),
            mode: RedemptionMode::SingleUse,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_mode(mut self, mode: RedemptionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> RedemptionMode {
        self.mode
    }

    /// Grants access to every distinct hash under one new token value.
    pub async fn grant_for_hashes<I>(&self, hashes: I) -> Result<Uuid, AppError>
    where
        I: IntoIterator<Item = ContentHash>,
    {
        self.sweep_lazily().await;

        let hashes: BTreeSet<ContentHash> = hashes.into_iter().collect();
        let token = Uuid::new_v4();
        let valid_until = self.clock.now() + self.validity;

        let rows: Vec<FileAccessToken> = hashes
            .into_iter()
            .map(|content_hash| FileAccessToken {
                token,
                content_hash,
                valid_until,
                requested_on: None,
            })
            .collect();
        self.tokens.insert_batch(&rows).await?;

        tracing::debug!(
            token = %token_prefix(token),
            files = rows.len(),
            valid_until = %valid_until,
            "file access granted"
        );
        Ok(token)
    }

    /// Grants access to the content of `files`. Files without an indexed
    /// content hash are skipped; the grant covers the rest.
    pub async fn grant_for_files(&self, files: &[FileRef]) -> Result<Uuid, AppError> {
        let mut hashes = BTreeSet::new();
        for file in files {
            match &file.content_hash {
                Some(hash) => {
                    hashes.insert(hash.clone());
                }
                None => tracing::warn!(
                    file_id = file.id,
                    name = %file.name,
                    "file missing in content index, skipped from grant"
                ),
            }
        }
        self.grant_for_hashes(hashes).await
    }

    pub async fn grant_for_resource_files(&self, resource: &Resource) -> Result<Uuid, AppError> {
        let files = self.registry.resource_files(resource).await?;
        self.grant_for_files(&files).await
    }

    /// Redeems one (token, hash) pair and resolves its content.
    pub async fn redeem(&self, token: Uuid, hash: &ContentHash) -> Result<ContentHandle, AppError> {
        self.sweep_lazily().await;

        let row = self
            .tokens
            .find(token, hash)
            .await?
            .ok_or_else(AppError::unauthorized)?;

        let now = self.clock.now();
        if row.is_expired(now) {
            return Err(AppError::unauthorized());
        }

        if self.mode == RedemptionMode::SingleUse {
            if row.is_redeemed() {
                tracing::warn!(token = %token_prefix(token), hash = %hash, "file access token replayed");
                return Err(AppError::unauthorized());
            }
            // Losing a concurrent redemption (or a sweep) counts as spent.
            if !self.tokens.mark_requested(token, hash, now).await? {
                return Err(AppError::unauthorized());
            }
        }

        let handle = self
            .content
            .by_content_hash(hash)
            .await?
            .ok_or_else(|| AppError::ContentStore(format!("no content for {}", hash)))?;

        tracing::debug!(token = %token_prefix(token), hash = %handle.hash(), bytes = handle.len(), "file redeemed");
        Ok(handle)
    }

    /// Deletes every expired row and returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<u64, AppError> {
        let purged = self.tokens.delete_expired(self.clock.now()).await?;
        if purged > 0 {
            tracing::info!(rows = purged, "purged expired file access tokens");
        }
        Ok(purged)
    }

    async fn sweep_lazily(&self) {
        if let Err(e) = self.sweep_expired().await {
            tracing::warn!("file access token sweep failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{ResourceKind, TenantId};
    use crate::store::memory::{MemoryContentStore, MemoryStore};
    use chrono::Utc;

    struct Fixture {
        store: Arc<MemoryStore>,
        content: Arc<MemoryContentStore>,
        clock: Arc<ManualClock>,
        manager: FileAccessTokenManager,
    }

    fn fixture(mode: RedemptionMode) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = FileAccessTokenManager::new(store.clone(), store.clone(), content.clone())
            .with_clock(clock.clone())
            .with_mode(mode);
        Fixture {
            store,
            content,
            clock,
            manager,
        }
    }

    #[test]
    fn test_redemption_mode_parses() {
        assert_eq!("single-use".parse::<RedemptionMode>().unwrap(), RedemptionMode::SingleUse);
        assert_eq!("reusable".parse::<RedemptionMode>().unwrap(), RedemptionMode::Reusable);
        assert!("twice".parse::<RedemptionMode>().is_err());
    }

    #[tokio::test]
    async fn test_grant_redeems_each_hash_exactly_once() {
        let f = fixture(RedemptionMode::SingleUse);
        let h1 = f.content.put(&b"one"[..]);
        let h2 = f.content.put(&b"two"[..]);
        let h3 = f.content.put(&b"three"[..]);
        let token = f
            .manager
            .grant_for_hashes([h1.clone(), h2.clone(), h3.clone()])
            .await
            .unwrap();

        for h in [&h1, &h2, &h3] {
            f.manager.redeem(token, h).await.unwrap();
        }
        for h in [&h1, &h2, &h3] {
            assert!(matches!(
                f.manager.redeem(token, h).await.unwrap_err(),
                AppError::Unauthorized { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_hash_outside_grant_is_unauthorized() {
        let f = fixture(RedemptionMode::SingleUse);
        let aa = ContentHash::parse(&"a".repeat(64)).unwrap();
        let bb = ContentHash::parse(&"b".repeat(64)).unwrap();
        let cc = ContentHash::parse(&"c".repeat(64)).unwrap();
        let token = f.manager.grant_for_hashes([aa, bb]).await.unwrap();

        assert!(matches!(
            f.manager.redeem(token, &cc).await.unwrap_err(),
            AppError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"x"[..]);
        f.manager.grant_for_hashes([h.clone()]).await.unwrap();

        assert!(matches!(
            f.manager.redeem(Uuid::new_v4(), &h).await.unwrap_err(),
            AppError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_grant_shares_one_token_and_expiry_and_dedupes() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"dup"[..]);
        let other = f.content.put(&b"other"[..]);
        let token = f
            .manager
            .grant_for_hashes([h.clone(), h.clone(), other.clone()])
            .await
            .unwrap();

        assert_eq!(f.store.file_token_count().await, 2);
        let a = f.store.find(token, &h).await.unwrap().unwrap();
        let b = f.store.find(token, &other).await.unwrap().unwrap();
        assert_eq!(a.valid_until, b.valid_until);
        assert_eq!(a.valid_until, f.clock.now() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_expired_grant_is_unauthorized() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"late"[..]);
        let token = f.manager.grant_for_hashes([h.clone()]).await.unwrap();

        f.clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(matches!(
            f.manager.redeem(token, &h).await.unwrap_err(),
            AppError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_grant_valid_at_exact_expiry() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"edge"[..]);
        let token = f.manager.grant_for_hashes([h.clone()]).await.unwrap();

        f.clock.advance(Duration::minutes(5));
        f.manager.redeem(token, &h).await.unwrap();
    }

    /// Store whose sweep never removes anything, to show redeem does not
    /// depend on the sweep for expiry.
    struct NoSweep(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl FileAccessTokenStore for NoSweep {
        async fn insert_batch(&self, rows: &[FileAccessToken]) -> Result<(), crate::errors::StoreError> {
            self.0.insert_batch(rows).await
        }
        async fn find(
            &self,
            token: Uuid,
            hash: &ContentHash,
        ) -> Result<Option<FileAccessToken>, crate::errors::StoreError> {
            self.0.find(token, hash).await
        }
        async fn mark_requested(
            &self,
            token: Uuid,
            hash: &ContentHash,
            at: chrono::DateTime<Utc>,
        ) -> Result<bool, crate::errors::StoreError> {
            self.0.mark_requested(token, hash, at).await
        }
        async fn delete_expired(&self, _now: chrono::DateTime<Utc>) -> Result<u64, crate::errors::StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_unswept_expired_row_is_still_refused() {
        for mode in [RedemptionMode::SingleUse, RedemptionMode::Reusable] {
            let store = Arc::new(MemoryStore::new());
            let content = Arc::new(MemoryContentStore::new());
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let manager = FileAccessTokenManager::new(
                Arc::new(NoSweep(store.clone())),
                store.clone(),
                content.clone(),
            )
            .with_clock(clock.clone())
            .with_mode(mode);

            let h = content.put(&b"stale"[..]);
            let token = manager.grant_for_hashes([h.clone()]).await.unwrap();
            clock.advance(Duration::hours(1));

            assert!(store.find(token, &h).await.unwrap().is_some());
            assert!(matches!(
                manager.redeem(token, &h).await.unwrap_err(),
                AppError::Unauthorized { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_sweep_purges_only_expired_rows() {
        let f = fixture(RedemptionMode::SingleUse);
        let old = f.manager.grant_for_hashes([ContentHash::digest(b"old")]).await.unwrap();
        f.clock.advance(Duration::minutes(4));
        let fresh = f.manager.grant_for_hashes([ContentHash::digest(b"new")]).await.unwrap();
        f.clock.advance(Duration::minutes(2));

        assert_eq!(f.manager.sweep_expired().await.unwrap(), 1);
        assert!(f.store.find(old, &ContentHash::digest(b"old")).await.unwrap().is_none());
        assert!(f.store.find(fresh, &ContentHash::digest(b"new")).await.unwrap().is_some());
        assert_eq!(f.manager.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_grant_sweeps_expired_rows() {
        let f = fixture(RedemptionMode::SingleUse);
        f.manager.grant_for_hashes([ContentHash::digest(b"a")]).await.unwrap();
        f.clock.advance(Duration::minutes(10));
        f.manager.grant_for_hashes([ContentHash::digest(b"b")]).await.unwrap();
        assert_eq!(f.store.file_token_count().await, 1);
    }

    #[tokio::test]
    async fn test_reusable_mode_allows_repeat_until_expiry() {
        let f = fixture(RedemptionMode::Reusable);
        let h = f.content.put(&b"again"[..]);
        let token = f.manager.grant_for_hashes([h.clone()]).await.unwrap();

        f.manager.redeem(token, &h).await.unwrap();
        f.manager.redeem(token, &h).await.unwrap();

        f.clock.advance(Duration::minutes(6));
        assert!(f.manager.redeem(token, &h).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_content_is_content_store_error() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"vanishing"[..]);
        let token = f.manager.grant_for_hashes([h.clone()]).await.unwrap();
        f.content.remove(&h);

        assert!(matches!(
            f.manager.redeem(token, &h).await.unwrap_err(),
            AppError::ContentStore(_)
        ));
    }

    #[tokio::test]
    async fn test_resource_grant_skips_unindexed_files_and_round_trips() {
        let f = fixture(RedemptionMode::SingleUse);
        let tenant = TenantId(1);
        let resource = f.store.add_resource(ResourceKind::Deployment, tenant).await;

        let mut expected = Vec::new();
        for body in [&b"logo"[..], &b"video"[..]] {
            let hash = f.content.put(body);
            let file = f.store.add_file(tenant, "asset", Some(hash.clone())).await;
            f.store.attach_file(resource.reference, file.id).await;
            expected.push((hash, body.to_vec()));
        }
        let orphan = f.store.add_file(tenant, "orphan", None).await;
        f.store.attach_file(resource.reference, orphan.id).await;

        let token = f.manager.grant_for_resource_files(&resource).await.unwrap();
        assert_eq!(f.store.file_token_count().await, 2);

        for (hash, body) in expected {
            let direct = f.content.by_content_hash(&hash).await.unwrap().unwrap();
            let redeemed = f.manager.redeem(token, &hash).await.unwrap();
            assert_eq!(redeemed.hash(), &hash);
            assert_eq!(redeemed.bytes(), direct.bytes());
            assert_eq!(redeemed.bytes().as_ref(), body.as_slice());
        }
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_have_one_winner() {
        let f = fixture(RedemptionMode::SingleUse);
        let h = f.content.put(&b"race"[..]);
        let token = f.manager.grant_for_hashes([h.clone()]).await.unwrap();

        let (a, b) = tokio::join!(f.manager.redeem(token, &h), f.manager.redeem(token, &h));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }
}
