//! Error types for Lockbox.

use thiserror::Error;

/// Errors raised while constructing or hashing a [`Key`](crate::Key).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The value does not fit in an unsigned 256-bit integer.
    #[error("key value out of range: {significant_bytes} significant bytes (max 32)")]
    OutOfRange {
        /// Number of bytes left after stripping leading zeros.
        significant_bytes: usize,
    },

    /// Negative values are not keys.
    #[error("key value must not be negative")]
    Negative,

    /// Argon2 parameters were rejected.
    #[error("invalid hash parameters: {0}")]
    InvalidParams(String),

    /// The key derivation itself failed.
    #[error("key hashing failed: {0}")]
    Hashing(String),
}

/// Errors raised while validating an [`Email`](crate::Email).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// The address does not match the accepted pattern.
    #[error("invalid email: {0:?}")]
    Invalid(String),
}

/// Errors that can occur while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum LockboxError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Frame carries a schema version this build does not speak
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Key construction failed
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Email validation failed
    #[error(transparent)]
    Email(#[from] EmailError),
}
