pub mod content;
pub mod resource;
pub mod token;

pub use content::{ContentHandle, ContentHash};
pub use resource::{FileRef, Presentation, Resource, ResourceKind, ResourceRef, TenantId};
pub use token::{FileAccessToken, Generated, NewPreviewToken, PreviewToken};
