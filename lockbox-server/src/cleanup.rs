//! Background cleanup task for expired release keys.
//!
//! Reads already hide expired keys; this sweep deletes them and trims idle
//! rate limiter entries.

use crate::server::Gateway;
use crate::storage::current_timestamp;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(gateway: Arc<Gateway>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = gateway.config().cleanup.clone();
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        tracing::info!("Cleanup task started (interval: {}s)", config.interval_secs);
        let mut timer = interval(Duration::from_secs(config.interval_secs));

        loop {
            timer.tick().await;
            sweep(&gateway).await;
        }
    })
}

/// Run one sweep now. Returns the number of release keys deleted.
pub async fn sweep(gateway: &Gateway) -> u64 {
    gateway.rate_limits().shrink();

    match gateway.storage().cleanup_expired(current_timestamp()).await {
        Ok(deleted) => {
            if deleted > 0 {
                gateway
                    .metrics()
                    .release_keys_swept
                    .fetch_add(deleted, Ordering::Relaxed);
                tracing::info!("Cleanup: deleted {} expired release keys", deleted);
            } else {
                tracing::debug!("Cleanup: no expired release keys");
            }
            deleted
        }
        Err(e) => {
            tracing::error!("Cleanup error: {}", e);
            0
        }
    }
}
