//! ObjectContentStore: content-addressed file bytes on an object store.
//!
//! Objects live under `content/<first two hash chars>/<hash>`. Configure the
//! backend with `CONTENT_STORE_URL`:
//!
//! ```text
//! # Local filesystem (development)
//! CONTENT_STORE_URL=file:///var/lib/preview/content
//!
//! # S3
//! CONTENT_STORE_URL=s3://my-bucket?region=eu-central-1
//!
//! # MinIO (self-hosted S3-compatible)
//! CONTENT_STORE_URL=s3://my-bucket?endpoint=http://minio:9000&region=us-east-1
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::{path::Path, ObjectStore};

use super::ContentStore;
use crate::errors::StoreError;
use crate::models::{ContentHandle, ContentHash};

const PREFIX: &str = "content";

pub struct ObjectContentStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectContentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: PREFIX.to_string(),
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let store = build_object_store(url)?;
        tracing::info!(url = %url, "content store: using object store backend");
        Ok(Self::new(Arc::from(store)))
    }

    fn path_for(&self, hash: &ContentHash) -> Path {
        let h = hash.as_str();
        Path::from(format!("{}/{}/{}", self.prefix, &h[..2], h))
    }

    /// Stores `data` under its own digest and returns it.
    pub async fn put(&self, data: bytes::Bytes) -> Result<ContentHash> {
        let hash = ContentHash::digest(&data);
        self.store
            .put(&self.path_for(&hash), data.into())
            .await
            .context("failed to put content to object store")?;
        Ok(hash)
    }
}

#[async_trait]
impl ContentStore for ObjectContentStore {
    async fn by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<ContentHandle>, StoreError> {
        let path = self.path_for(hash);
        let result = match self.store.get(&path).await {
            Ok(r) => r,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context("failed to get content from object store")
                    .into())
            }
        };
        let bytes = result
            .bytes()
            .await
            .context("failed to read content bytes")?;

        Ok(Some(ContentHandle::new(hash.clone(), bytes)))
    }
}

/// Parse a `CONTENT_STORE_URL` into an object store.
fn build_object_store(url: &str) -> Result<Box<dyn ObjectStore>> {
    if url.starts_with("file://") {
        let path = url.trim_start_matches("file://");
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create content directory {}", path))?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(path)
            .context("failed to create local file system object store")?;
        return Ok(Box::new(store));
    }

    if url.starts_with("s3://") {
        let without_scheme = url.trim_start_matches("s3://");
        let bucket = without_scheme.split('?').next().unwrap_or(without_scheme);

        let endpoint = parse_query_param(url, "endpoint");
        let region = parse_query_param(url, "region").unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&region);

        if let Some(ep) = endpoint {
            builder = builder.with_endpoint(&ep).with_allow_http(true);
        }

        // Credentials from env: AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                builder = builder.with_access_key_id(key).with_secret_access_key(secret);
            }
        }

        let store = builder.build().context("failed to build S3 object store")?;
        return Ok(Box::new(store));
    }

    anyhow::bail!("unsupported CONTENT_STORE_URL scheme: {}", url)
}

fn parse_query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split('?').nth(1)?;
    for part in query.split('&') {
        let mut kv = part.splitn(2, '=');
        if kv.next() == Some(key) {
            return kv.next().map(|v| urlencoding::decode(v).unwrap_or_default().into_owned());
        }
    }
    None
}
