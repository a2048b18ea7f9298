//! Gateway state shared by every connection.
//!
//! The Gateway owns the storage handle, the key hasher, the rate limiters and
//! the operational counters. Connections hold it behind an `Arc`.

use crate::config::Config;
use crate::error::{ProtocolError, ProtocolResult, Result};
use crate::limits::RateLimits;
use crate::storage::RecordStorage;
use lockbox_types::{Key, KeyHash, KeyHasher, RequestKind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring gateway activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Requests dispatched, indexed by `RequestKind as usize - 1`.
    requests: [AtomicU64; RequestKind::ALL.len()],
    /// Requests rejected because the supplied key did not match.
    pub auth_failures: AtomicU64,
    /// Argon2 derivations run for hashing or verifying keys.
    pub key_derivations: AtomicU64,
    /// Requests answered with a generic failure.
    pub internal_failures: AtomicU64,
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total frame payload bytes received.
    pub bytes_received: AtomicU64,
    /// Total frame payload bytes sent.
    pub bytes_sent: AtomicU64,
    /// Total connection and login rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Total expired release keys deleted by the cleanup task.
    pub release_keys_swept: AtomicU64,
}

impl GatewayMetrics {
    /// Count one dispatched request.
    pub fn record_request(&self, kind: RequestKind) {
        self.requests[kind as usize - 1].fetch_add(1, Ordering::Relaxed);
    }

    /// Requests dispatched so far for one kind.
    pub fn requests(&self, kind: RequestKind) -> u64 {
        self.requests[kind as usize - 1].load(Ordering::Relaxed)
    }
}

/// Shared state of a running lockbox server.
pub struct Gateway {
    config: Config,
    storage: Arc<dyn RecordStorage>,
    hasher: KeyHasher,
    rate_limits: RateLimits,
    metrics: GatewayMetrics,
    active_connections: AtomicUsize,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("hasher", &self.hasher)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway over `storage`.
    ///
    /// Fails if the configured hash parameters are unusable.
    pub fn new(config: Config, storage: Arc<dyn RecordStorage>) -> Result<Self> {
        let hasher = KeyHasher::new(&config.auth)?;
        let rate_limits = RateLimits::new(&config.limits);
        Ok(Self {
            config,
            storage,
            hasher,
            rate_limits,
            metrics: GatewayMetrics::default(),
            active_connections: AtomicUsize::new(0),
        })
    }

    /// Get the gateway configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &dyn RecordStorage {
        self.storage.as_ref()
    }

    /// Get a clone of the storage Arc for background tasks.
    pub fn storage_arc(&self) -> Arc<dyn RecordStorage> {
        self.storage.clone()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Number of currently open client connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Derive the stored verifier for `key` on a blocking thread.
    pub async fn hash_key(&self, key: Key) -> ProtocolResult<KeyHash> {
        self.metrics.key_derivations.fetch_add(1, Ordering::Relaxed);
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&key))
            .await
            .map_err(|e| ProtocolError::Hashing(e.to_string()))?
            .map_err(ProtocolError::from)
    }

    /// Check `key` against a stored verifier on a blocking thread.
    ///
    /// Counts a mismatch as an auth failure.
    pub async fn verify_key(&self, key: Key, expected: KeyHash) -> ProtocolResult<bool> {
        let matches = self.hash_key(key).await? == expected;
        if !matches {
            self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(matches)
    }
}
