//! Background job: purge expired file access tokens.
//!
//! Grants and redemptions already sweep lazily and the expiry check at
//! redemption is authoritative, so this only bounds table growth when the
//! service sits idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::AppState;

/// Spawn the periodic sweep. Call this once at startup.
pub fn spawn(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = state.files.sweep_expired().await {
                tracing::error!("file access token sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::memory::{MemoryContentStore, MemoryStore};
    use crate::store::Backend;
    use chrono::Utc;

    #[tokio::test]
    async fn test_sweep_job_purges_expired_rows() {
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let hash = content.put(&b"bytes"[..]);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = Arc::new(AppState::with_clock(
            Backend::memory(store.clone(), content),
            Config::default(),
            clock.clone(),
        ));

        state.files.grant_for_hashes([hash]).await.unwrap();
        assert_eq!(store.file_token_count().await, 1);
        clock.advance(chrono::Duration::minutes(6));

        let handle = spawn(state.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            if store.file_token_count().await == 0 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.file_token_count().await, 0);
    }
}
