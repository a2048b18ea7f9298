//! Storage layer for lockbox-server.
//!
//! Persists users, items and release keys. Every operation runs to
//! completion under one store-wide lock, so no partial write is ever
//! observable. Records leave the store only as owned snapshots.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageResult;
use async_trait::async_trait;
use lockbox_types::{Email, ItemId, Key, KeyHash};
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot of a user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique identity.
    pub email: Email,
    /// Verifier for the account's auth key.
    pub auth_key_hash: KeyHash,
    /// Client-defined ciphertext.
    pub private_info: Vec<u8>,
    /// Key others encrypt messages to this user with.
    pub public_key: Key,
    /// Queued ciphertext messages, oldest first.
    pub messages: Vec<Vec<u8>>,
    /// Public plaintext description.
    pub description: String,
}

impl User {
    /// A freshly signed-up user: zero public key, nothing stored yet.
    pub fn new(email: Email, auth_key_hash: KeyHash) -> Self {
        Self {
            email,
            auth_key_hash,
            private_info: Vec::new(),
            public_key: Key::ZERO,
            messages: Vec::new(),
            description: String::new(),
        }
    }
}

/// Snapshot of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Server-allocated identity.
    pub id: ItemId,
    /// Verifier for the item's auth key.
    pub auth_key_hash: KeyHash,
    /// Ciphertext; empty in metadata snapshots.
    pub contents: Vec<u8>,
    /// Unexpired release keys, oldest first.
    pub release_keys: Vec<ReleaseKey>,
}

/// One party's release of its share of an item's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseKey {
    /// Client-defined ciphertext.
    pub info: Vec<u8>,
    /// Unix seconds after which the key is no longer returned.
    pub expires: i64,
}

/// Public directory row for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// User identity.
    pub email: Email,
    /// Public description.
    pub description: String,
    /// Public key.
    pub public_key: Key,
}

/// Row counts, for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of user accounts.
    pub users: u64,
    /// Number of items.
    pub items: u64,
    /// Number of stored release keys, expired or not.
    pub release_keys: u64,
}

/// Trait for record storage backends.
///
/// Inserts take an existence precondition: with `should_already_exist`
/// false the key must be absent, with true it must be present. A mismatch
/// fails with [`StorageError::Precondition`](crate::error::StorageError::Precondition)
/// and changes nothing. Once the precondition holds the whole record,
/// auxiliary rows included, is replaced in one transaction.
#[async_trait]
pub trait RecordStorage: Send + Sync {
    /// Insert or replace a user.
    async fn insert_user(&self, user: &User, should_already_exist: bool) -> StorageResult<()>;

    /// Insert or replace an item and its release keys.
    async fn insert_item(&self, item: &Item, should_already_exist: bool) -> StorageResult<()>;

    /// Get a user.
    async fn get_user(&self, email: &Email) -> StorageResult<User>;

    /// Get an item with its contents and unexpired release keys.
    async fn get_item(&self, id: &ItemId) -> StorageResult<Item>;

    /// Get an item without its contents.
    ///
    /// Same shape as [`get_item`](Self::get_item) with `contents` always empty.
    async fn get_item_metadata(&self, id: &ItemId) -> StorageResult<Item>;

    /// Remove a user, its description and its messages. Absent users are fine.
    async fn remove_user(&self, email: &Email) -> StorageResult<()>;

    /// Remove an item and its release keys. Absent items are fine.
    async fn remove_item(&self, id: &ItemId) -> StorageResult<()>;

    /// Append a message to a user's queue.
    async fn append_message(&self, email: &Email, content: &[u8]) -> StorageResult<()>;

    /// Replace a user's private info and message queue together.
    async fn update_user_private(
        &self,
        email: &Email,
        private_info: &[u8],
        messages: &[Vec<u8>],
    ) -> StorageResult<()>;

    /// Replace a user's public key and description together.
    async fn update_user_profile(
        &self,
        email: &Email,
        public_key: &Key,
        description: &str,
    ) -> StorageResult<()>;

    /// Attach a release key to an existing item.
    async fn insert_release_key(&self, id: &ItemId, release_key: &ReleaseKey)
        -> StorageResult<()>;

    /// Replace an item's contents.
    async fn update_item_contents(&self, id: &ItemId, contents: &[u8]) -> StorageResult<()>;

    /// Replace an item's contents with `prefix || contents`.
    ///
    /// Fails with `ContentsTooLarge`, leaving the item unchanged, if the
    /// result would exceed `limit` bytes.
    async fn prefix_item_contents(
        &self,
        id: &ItemId,
        prefix: &[u8],
        limit: usize,
    ) -> StorageResult<()>;

    /// Every user's public directory row, in email order.
    async fn user_directory(&self) -> StorageResult<Vec<DirectoryEntry>>;

    /// Delete release keys with `expires <= now`.
    ///
    /// Returns the number of release keys deleted.
    async fn cleanup_expired(&self, now: i64) -> StorageResult<u64>;

    /// Current row counts.
    async fn stats(&self) -> StorageResult<StorageStats>;
}

/// Current Unix time in seconds.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
