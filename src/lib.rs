//! Preview gateway: capability tokens for previewing tenant resources and
//! the files they reference.
//!
//! Re-exports modules needed by the binary and by integration tests in `tests/`.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod gate;
pub mod jobs;
pub mod models;
pub mod store;
pub mod tokens;

use std::sync::Arc;

use clock::{Clock, SystemClock};
use gate::AccessGate;
use store::{Backend, ContentStore};
use tokens::{FileAccessTokenManager, PreviewTokenManager};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub previews: PreviewTokenManager,
    pub files: FileAccessTokenManager,
    pub gate: AccessGate,
    pub content: Arc<dyn ContentStore>,
    pub config: config::Config,
}

impl AppState {
    pub fn new(backend: Backend, config: config::Config) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Backend, config: config::Config, clock: Arc<dyn Clock>) -> Self {
        let previews =
            PreviewTokenManager::new(backend.registry.clone(), backend.preview_tokens.clone());
        let files = FileAccessTokenManager::new(
            backend.file_tokens.clone(),
            backend.registry.clone(),
            backend.content.clone(),
        )
        .with_clock(clock)
        .with_validity(config.file_token_validity())
        .with_mode(config.file_token_mode);
        let gate = AccessGate::new(backend.registry.clone(), backend.preview_tokens.clone());

        Self {
            previews,
            files,
            gate,
            content: backend.content,
            config,
        }
    }
}
