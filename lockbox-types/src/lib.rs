//! # lockbox-types
//!
//! Wire format and key types for the Lockbox encrypted storage gateway.
//!
//! This crate provides the foundational types shared by the server and client:
//! - [`Key`], [`KeyHash`], [`KeyHasher`] - 256-bit keys and their memory-hard verifiers
//! - [`Email`], [`ItemId`] - Record identities
//! - [`Request`], [`Response`] - Protocol messages, one response kind per request kind
//! - [`Envelope`] - Versioned wrapper that every frame payload is encoded as
//! - [`LockboxError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod hash;
mod ids;
mod messages;

pub use envelope::{decode, encode, Envelope, PROTOCOL_VERSION};
pub use error::{EmailError, KeyError, LockboxError};
pub use hash::{HashParams, KeyHasher};
pub use ids::{Email, ItemId, Key, KeyHash, KEY_LEN};
pub use messages::{
    CreateItemRequest, CreateItemResponse, DeleteItemRequest, DeleteItemResponse,
    DeleteUserRequest, DeleteUserResponse, EncryptItemRequest, EncryptItemResponse, FetchResponse,
    ItemFetchRequest, ItemFetchResponse, LoginRequest, LoginResponse, PushRequest, PushResponse,
    ReleaseItemRequest, ReleaseItemResponse, Request, RequestKind, Response, SendRequest,
    SendResponse, SetProfileRequest, SetProfileResponse, SignupRequest, SignupResponse,
};

// Blob fields in messages are `ByteBuf`s; re-exported so callers need no direct dependency.
pub use serde_bytes::ByteBuf;
