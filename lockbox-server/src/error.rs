//! Error types for lockbox-server.

use std::path::PathBuf;

use lockbox_core::TransportError;
use lockbox_types::{KeyError, LockboxError};

/// Main error type for lockbox-server operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Hash parameters rejected at startup.
    #[error("auth configuration error: {0}")]
    Auth(#[from] KeyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Existence precondition did not hold for an insert.
    #[error("precondition failed for {entity} {key}: expected to {}", expectation(.should_exist))]
    Precondition {
        /// Record kind ("user" or "item").
        entity: &'static str,
        /// Record key.
        key: String,
        /// What the caller expected.
        should_exist: bool,
    },

    /// Record is absent.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Record kind ("user" or "item").
        entity: &'static str,
        /// Record key.
        key: String,
    },

    /// A write would grow an item past the size its fetch response can carry.
    #[error("item {key} would hold {size} bytes (limit: {limit} bytes)")]
    ContentsTooLarge {
        /// Item id.
        key: String,
        /// Resulting contents size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// A stored row could not be turned back into a record.
    #[error("corrupt {entity} row: {reason}")]
    Corrupt {
        /// Record kind.
        entity: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

fn expectation(should_exist: &bool) -> &'static str {
    if *should_exist {
        "exist"
    } else {
        "not exist"
    }
}

/// Protocol layer errors.
///
/// Never sent to clients; they either end the connection or are logged and
/// turned into a generic-failure response.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame payload could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(#[source] LockboxError),

    /// Response could not be encoded.
    #[error("response encoding failed: {0}")]
    Encoding(#[source] LockboxError),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: client={client}, server={server}")]
    VersionMismatch {
        /// Client protocol version.
        client: u8,
        /// Server protocol version.
        server: u8,
    },

    /// `Send.content` over the configured bound.
    #[error("content too large: {size} bytes (limit: {limit} bytes)")]
    ContentTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Request needs a logged-in session.
    #[error("session not authenticated: login required first")]
    NotAuthenticated,

    /// Request was throttled.
    #[error("rate limited: {0}")]
    RateLimited(#[from] crate::limits::RateLimitError),

    /// Key hashing failed or its blocking task died.
    #[error("key hashing failed: {0}")]
    Hashing(String),

    /// Storage failed underneath a request.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Framing or socket failure.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl From<LockboxError> for ProtocolError {
    fn from(err: LockboxError) -> Self {
        match err {
            LockboxError::UnsupportedVersion(client) => ProtocolError::VersionMismatch {
                client,
                server: lockbox_types::PROTOCOL_VERSION,
            },
            other => ProtocolError::InvalidMessage(other),
        }
    }
}

impl From<KeyError> for ProtocolError {
    fn from(err: KeyError) -> Self {
        ProtocolError::Hashing(err.to_string())
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_message_names_expectation() {
        let err = StorageError::Precondition {
            entity: "user",
            key: "a@b.com".into(),
            should_exist: false,
        };
        assert_eq!(
            err.to_string(),
            "precondition failed for user a@b.com: expected to not exist"
        );

        let err = StorageError::Precondition {
            entity: "item",
            key: "x".into(),
            should_exist: true,
        };
        assert!(err.to_string().ends_with("expected to exist"));
    }

    #[test]
    fn unsupported_version_maps_to_mismatch() {
        let err: ProtocolError = LockboxError::UnsupportedVersion(7).into();
        assert!(matches!(
            err,
            ProtocolError::VersionMismatch {
                client: 7,
                server: 1
            }
        ));
    }
}
