//! Rate limiting for lockbox-server.
//!
//! Two keyed limiters, both backed by governor over a DashMap:
//! - remote IP address for new connections
//! - email address for login attempts

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use lockbox_types::Email;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the gateway.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits new connections per remote IP.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,
    /// Limits login attempts per email, whatever connection they arrive on.
    login_limiter: Arc<KeyedLimiter<Email>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_keys", &self.connection_limiter.len())
            .field("login_keys", &self.login_limiter.len())
            .finish()
    }
}

/// Per-minute quota. Validated configs never hold zero; a zero still yields
/// the smallest usable quota instead of panicking.
fn per_minute(value: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN))
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(per_minute(
                config.connections_per_minute,
            ))),
            login_limiter: Arc::new(RateLimiter::keyed(per_minute(
                config.login_attempts_per_minute,
            ))),
        }
    }

    /// Check if a new connection from `ip` is allowed.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if another login attempt for `email` is allowed.
    pub fn check_login(&self, email: &Email) -> Result<(), RateLimitError> {
        self.login_limiter
            .check_key(email)
            .map_err(|_| RateLimitError::LoginLimitExceeded)
    }

    /// Number of tracked connection keys.
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Number of tracked login keys.
    pub fn login_keys_count(&self) -> usize {
        self.login_limiter.len()
    }

    /// Evict keys whose quota has fully recharged. Called from the cleanup task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.login_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connections from one address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many login attempts for one email.
    #[error("login rate limit exceeded")]
    LoginLimitExceeded,
}
