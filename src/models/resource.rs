use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::content::ContentHash;

/// Opaque tenant identifier, resolved upstream and injected per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TenantId)
    }
}

/// Kinds of previewable resources. Doubles as the token type discriminator
/// on the HTTP surface (`"deployment"`, `"group"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Deployment,
    Group,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Group => "group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployment" => Ok(ResourceKind::Deployment),
            "group" => Ok(ResourceKind::Group),
            other => Err(UnknownResourceKind(other.to_string())),
        }
    }
}

/// Reference to exactly one resource in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ResourceRef {
    Deployment(i64),
    Group(i64),
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: i64) -> Self {
        match kind {
            ResourceKind::Deployment => ResourceRef::Deployment(id),
            ResourceKind::Group => ResourceRef::Group(id),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRef::Deployment(_) => ResourceKind::Deployment,
            ResourceRef::Group(_) => ResourceKind::Group,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            ResourceRef::Deployment(id) | ResourceRef::Group(id) => *id,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.id())
    }
}

/// A previewable resource together with its owning tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub reference: ResourceRef,
    pub tenant: TenantId,
}

/// A file referenced by a resource.
///
/// `content_hash` is `None` when the file has no entry in the content index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    pub id: i64,
    #[serde(skip)]
    pub tenant: TenantId,
    pub name: String,
    #[serde(rename = "sha256sum")]
    pub content_hash: Option<ContentHash>,
}

/// A resource and the set of files it references.
#[derive(Debug, Clone, Serialize)]
pub struct Presentation {
    #[serde(skip)]
    pub resource: Resource,
    pub files: Vec<FileRef>,
}

impl Presentation {
    pub fn contains(&self, file_id: i64) -> bool {
        self.files.iter().any(|f| f.id == file_id)
    }

    pub fn file_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.files.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
