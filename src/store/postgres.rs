use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{FileAccessTokenStore, PreviewTokenStore, ResourceRegistry};
use crate::errors::StoreError;
use crate::models::{
    ContentHash, FileAccessToken, FileRef, NewPreviewToken, PreviewToken, Resource,
    ResourceKind, ResourceRef, TenantId,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// -- Resource Registry --

#[async_trait]
impl ResourceRegistry for PgStore {
    async fn find_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<Resource>, StoreError> {
        let sql = match kind {
            ResourceKind::Deployment => "SELECT id FROM deployments WHERE id = $1 AND tenant_id = $2",
            ResourceKind::Group => "SELECT id FROM groups WHERE id = $1 AND tenant_id = $2",
        };
        let found = sqlx::query_scalar::<_, i64>(sql)
            .bind(id)
            .bind(tenant.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.map(|id| Resource {
            reference: ResourceRef::new(kind, id),
            tenant,
        }))
    }

    async fn get(&self, reference: ResourceRef) -> Result<Option<Resource>, StoreError> {
        let sql = match reference.kind() {
            ResourceKind::Deployment => "SELECT tenant_id FROM deployments WHERE id = $1",
            ResourceKind::Group => "SELECT tenant_id FROM groups WHERE id = $1",
        };
        let tenant = sqlx::query_scalar::<_, i64>(sql)
            .bind(reference.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(tenant.map(|t| Resource {
            reference,
            tenant: TenantId(t),
        }))
    }

    async fn resource_files(&self, resource: &Resource) -> Result<Vec<FileRef>, StoreError> {
        let sql = match resource.reference.kind() {
            ResourceKind::Deployment => {
                r#"SELECT f.id, f.tenant_id, f.name, f.sha256sum
                   FROM deployment_files l JOIN files f ON f.id = l.file_id
                   WHERE l.deployment_id = $1"#
            }
            ResourceKind::Group => {
                r#"SELECT f.id, f.tenant_id, f.name, f.sha256sum
                   FROM group_files l JOIN files f ON f.id = l.file_id
                   WHERE l.group_id = $1"#
            }
        };
        let rows = sqlx::query_as::<_, FileRow>(sql)
            .bind(resource.reference.id())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(FileRef::from).collect())
    }

    async fn find_file(
        &self,
        file_id: i64,
        tenant: TenantId,
    ) -> Result<Option<FileRef>, StoreError> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT id, tenant_id, name, sha256sum FROM files WHERE id = $1 AND tenant_id = $2",
        )
        .bind(file_id)
        .bind(tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FileRef::from))
    }
}

// -- Preview Token Operations --

#[async_trait]
impl PreviewTokenStore for PgStore {
    async fn find_for_resource(
        &self,
        resource: ResourceRef,
    ) -> Result<Option<PreviewToken>, StoreError> {
        let sql = match resource.kind() {
            ResourceKind::Deployment => {
                "SELECT id, token, kind, deployment_id, group_id, forced, created_at FROM preview_tokens WHERE deployment_id = $1 ORDER BY id ASC LIMIT 1"
            }
            ResourceKind::Group => {
                "SELECT id, token, kind, deployment_id, group_id, forced, created_at FROM preview_tokens WHERE group_id = $1 ORDER BY id ASC LIMIT 1"
            }
        };
        let row = sqlx::query_as::<_, PreviewTokenRow>(sql)
            .bind(resource.id())
            .fetch_optional(&self.pool)
            .await?;

        row.map(PreviewToken::try_from).transpose()
    }

    async fn insert(&self, token: &NewPreviewToken) -> Result<PreviewToken, StoreError> {
        let (deployment_id, group_id) = match token.resource {
            ResourceRef::Deployment(id) => (Some(id), None),
            ResourceRef::Group(id) => (None, Some(id)),
        };
        let row = sqlx::query_as::<_, PreviewTokenRow>(
            r#"INSERT INTO preview_tokens (token, kind, deployment_id, group_id, forced)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, token, kind, deployment_id, group_id, forced, created_at"#,
        )
        .bind(token.token)
        .bind(token.resource.kind().as_str())
        .bind(deployment_id)
        .bind(group_id)
        .bind(token.forced)
        .fetch_one(&self.pool)
        .await?;

        PreviewToken::try_from(row)
    }

    async fn by_id(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<Option<PreviewToken>, StoreError> {
        // Ownership is re-checked through the resource on every lookup.
        let row = sqlx::query_as::<_, PreviewTokenRow>(
            r#"SELECT t.id, t.token, t.kind, t.deployment_id, t.group_id, t.forced, t.created_at
               FROM preview_tokens t
               LEFT JOIN deployments d ON d.id = t.deployment_id
               LEFT JOIN groups g ON g.id = t.group_id
               WHERE t.id = $1 AND t.kind = $2 AND COALESCE(d.tenant_id, g.tenant_id) = $3"#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PreviewToken::try_from).transpose()
    }

    async fn by_value(
        &self,
        kind: ResourceKind,
        token: Uuid,
    ) -> Result<Option<PreviewToken>, StoreError> {
        let row = sqlx::query_as::<_, PreviewTokenRow>(
            "SELECT id, token, kind, deployment_id, group_id, forced, created_at FROM preview_tokens WHERE token = $1 AND kind = $2",
        )
        .bind(token)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PreviewToken::try_from).transpose()
    }

    fn for_tenant(
        &self,
        kind: ResourceKind,
        tenant: TenantId,
    ) -> BoxStream<'_, Result<PreviewToken, StoreError>> {
        sqlx::query_as::<_, PreviewTokenRow>(
            r#"SELECT t.id, t.token, t.kind, t.deployment_id, t.group_id, t.forced, t.created_at
               FROM preview_tokens t
               LEFT JOIN deployments d ON d.id = t.deployment_id
               LEFT JOIN groups g ON g.id = t.group_id
               WHERE t.kind = $1 AND COALESCE(d.tenant_id, g.tenant_id) = $2"#,
        )
        .bind(kind.as_str())
        .bind(tenant.0)
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from).and_then(PreviewToken::try_from))
        .boxed()
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: i64,
        tenant: TenantId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"DELETE FROM preview_tokens
               WHERE id = $1 AND kind = $2
                 AND (deployment_id IN (SELECT id FROM deployments WHERE tenant_id = $3)
                      OR group_id IN (SELECT id FROM groups WHERE tenant_id = $3))"#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(tenant.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// -- File Access Token Operations --

#[async_trait]
impl FileAccessTokenStore for PgStore {
    async fn insert_batch(&self, rows: &[FileAccessToken]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO file_access_tokens (token, sha256sum, valid_until, requested_on)
                   VALUES ($1, $2, $3, $4)"#,
            )
            .bind(row.token)
            .bind(row.content_hash.as_str())
            .bind(row.valid_until)
            .bind(row.requested_on)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find(
        &self,
        token: Uuid,
        hash: &ContentHash,
    ) -> Result<Option<FileAccessToken>, StoreError> {
        let row = sqlx::query_as::<_, FileAccessTokenRow>(
            "SELECT token, sha256sum, valid_until, requested_on FROM file_access_tokens WHERE token = $1 AND sha256sum = $2",
        )
        .bind(token)
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileAccessToken::try_from).transpose()
    }

    async fn mark_requested(
        &self,
        token: Uuid,
        hash: &ContentHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE file_access_tokens SET requested_on = $3
               WHERE token = $1 AND sha256sum = $2
                 AND requested_on IS NULL AND valid_until >= $3"#,
        )
        .bind(token)
        .bind(hash.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM file_access_tokens WHERE valid_until < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// -- Row Types --

#[derive(Debug, sqlx::FromRow)]
pub struct PreviewTokenRow {
    pub id: i64,
    pub token: Uuid,
    pub kind: String,
    pub deployment_id: Option<i64>,
    pub group_id: Option<i64>,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PreviewTokenRow> for PreviewToken {
    type Error = StoreError;

    fn try_from(row: PreviewTokenRow) -> Result<Self, Self::Error> {
        let resource = match (row.kind.as_str(), row.deployment_id, row.group_id) {
            ("deployment", Some(id), None) => ResourceRef::Deployment(id),
            ("group", None, Some(id)) => ResourceRef::Group(id),
            _ => {
                return Err(StoreError::Other(anyhow::anyhow!(
                    "preview token {} has an inconsistent resource reference",
                    row.id
                )))
            }
        };
        Ok(PreviewToken {
            id: row.id,
            token: row.token,
            resource,
            forced: row.forced,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct FileAccessTokenRow {
    pub token: Uuid,
    pub sha256sum: String,
    pub valid_until: DateTime<Utc>,
    pub requested_on: Option<DateTime<Utc>>,
}

impl TryFrom<FileAccessTokenRow> for FileAccessToken {
    type Error = StoreError;

    fn try_from(row: FileAccessTokenRow) -> Result<Self, Self::Error> {
        let content_hash = ContentHash::parse(&row.sha256sum)
            .map_err(|e| StoreError::Other(anyhow::anyhow!("{}: {}", e, row.sha256sum)))?;
        Ok(FileAccessToken {
            token: row.token,
            content_hash,
            valid_until: row.valid_until,
            requested_on: row.requested_on,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub sha256sum: Option<String>,
}

impl From<FileRow> for FileRef {
    /// A missing or malformed checksum leaves the file without a content hash.
    fn from(row: FileRow) -> Self {
        FileRef {
            id: row.id,
            tenant: TenantId(row.tenant_id),
            name: row.name,
            content_hash: row.sha256sum.as_deref().and_then(|s| ContentHash::parse(s).ok()),
        }
    }
}
