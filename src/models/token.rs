use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::ContentHash;
use super::resource::{ResourceKind, ResourceRef};

/// Parses a client-supplied token value. Accepts the 32-char hex form handed
/// out by the API as well as the hyphenated UUID form.
pub fn parse_token_value(value: &str) -> Option<Uuid> {
    Uuid::try_parse(value.trim()).ok()
}

/// Hex form of a token value, as handed out to clients.
pub fn encode_token(token: Uuid) -> String {
    token.simple().to_string()
}

/// Short, log-safe prefix of a token value.
pub fn token_prefix(token: Uuid) -> String {
    encode_token(token)[..8].to_string()
}

/// Long-lived capability granting preview access to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewToken {
    pub id: i64,
    #[serde(with = "uuid::serde::simple")]
    pub token: Uuid,
    pub resource: ResourceRef,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
}

impl PreviewToken {
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }
}

/// A preview token that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPreviewToken {
    pub token: Uuid,
    pub resource: ResourceRef,
    pub forced: bool,
}

impl NewPreviewToken {
    pub fn new(resource: ResourceRef, forced: bool) -> Self {
        Self {
            token: Uuid::new_v4(),
            resource,
            forced,
        }
    }
}

/// Outcome of a generate call: either the token already stored for the
/// resource, or a fresh one awaiting persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a fresh token must be saved before its value is handed out"]
pub enum Generated {
    Existing(PreviewToken),
    Fresh(NewPreviewToken),
}

impl Generated {
    pub fn token(&self) -> Uuid {
        match self {
            Generated::Existing(t) => t.token,
            Generated::Fresh(t) => t.token,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Generated::Fresh(_))
    }
}

/// One (token, content hash) row of a file access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccessToken {
    #[serde(with = "uuid::serde::simple")]
    pub token: Uuid,
    #[serde(rename = "sha256sum")]
    pub content_hash: ContentHash,
    pub valid_until: DateTime<Utc>,
    pub requested_on: Option<DateTime<Utc>>,
}

impl FileAccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until < now
    }

    pub fn is_redeemed(&self) -> bool {
        self.requested_on.is_some()
    }
}
