//! Token lifecycle: long-lived preview tokens bound to one resource, and
//! short-lived file access grants bound to content hashes.

pub mod file_access;
pub mod preview;

pub use file_access::{FileAccessTokenManager, RedemptionMode};
pub use preview::PreviewTokenManager;
