//! SQLite storage backend for lockbox-server.

use super::{
    current_timestamp, DirectoryEntry, Item, RecordStorage, ReleaseKey, StorageStats, User,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use lockbox_types::{Email, ItemId, Key, KeyHash};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqliteConnection;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

/// SQLite-based record storage.
///
/// `lock` is held for the full duration of every operation, reads included.
/// The pool holds a single connection, so transactions never interleave.
pub struct SqliteStorage {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        Self::connect(options).await
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?.foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> StorageResult<Self> {
        // One connection that never expires: an in-memory database lives
        // exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                email TEXT PRIMARY KEY,
                auth_key_hash BLOB NOT NULL,
                private_info BLOB NOT NULL,
                public_key BLOB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
                content BLOB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_descriptions (
                email TEXT PRIMARY KEY REFERENCES users(email) ON DELETE CASCADE,
                description TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id BLOB PRIMARY KEY,
                auth_key_hash BLOB NOT NULL,
                contents BLOB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS release_keys (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id BLOB NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                info BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_user_messages_email ON user_messages(email)",
            "CREATE INDEX IF NOT EXISTS idx_release_keys_item ON release_keys(item_id)",
            "CREATE INDEX IF NOT EXISTS idx_release_keys_expires ON release_keys(expires_at)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn check_precondition(
    entity: &'static str,
    key: &dyn std::fmt::Display,
    exists: bool,
    should_exist: bool,
) -> StorageResult<()> {
    if exists == should_exist {
        Ok(())
    } else {
        Err(StorageError::Precondition {
            entity,
            key: key.to_string(),
            should_exist,
        })
    }
}

fn user_not_found(email: &Email) -> StorageError {
    StorageError::NotFound {
        entity: "user",
        key: email.to_string(),
    }
}

fn item_not_found(id: &ItemId) -> StorageError {
    StorageError::NotFound {
        entity: "item",
        key: id.to_string(),
    }
}

async fn user_exists(conn: &mut SqliteConnection, email: &Email) -> StorageResult<bool> {
    let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = ?1")
        .bind(email.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

async fn item_exists(conn: &mut SqliteConnection, id: &ItemId) -> StorageResult<bool> {
    let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM items WHERE id = ?1")
        .bind(id.as_bytes())
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

async fn replace_messages(
    conn: &mut SqliteConnection,
    email: &Email,
    messages: &[Vec<u8>],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM user_messages WHERE email = ?1")
        .bind(email.as_str())
        .execute(&mut *conn)
        .await?;

    for content in messages {
        sqlx::query("INSERT INTO user_messages (email, content) VALUES (?1, ?2)")
            .bind(email.as_str())
            .bind(content.as_slice())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn upsert_description(
    conn: &mut SqliteConnection,
    email: &Email,
    description: &str,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_descriptions (email, description) VALUES (?1, ?2)
        ON CONFLICT(email) DO UPDATE SET description = excluded.description
        "#,
    )
    .bind(email.as_str())
    .bind(description)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_release_key_row(
    conn: &mut SqliteConnection,
    id: &ItemId,
    release_key: &ReleaseKey,
) -> StorageResult<()> {
    sqlx::query("INSERT INTO release_keys (item_id, info, expires_at) VALUES (?1, ?2, ?3)")
        .bind(id.as_bytes())
        .bind(release_key.info.as_slice())
        .bind(release_key.expires)
        .execute(conn)
        .await?;
    Ok(())
}

async fn live_release_keys(
    conn: &mut SqliteConnection,
    id: &ItemId,
    now: i64,
) -> StorageResult<Vec<ReleaseKey>> {
    let rows: Vec<(Vec<u8>, i64)> = sqlx::query_as(
        r#"
        SELECT info, expires_at FROM release_keys
        WHERE item_id = ?1 AND expires_at > ?2
        ORDER BY seq ASC
        "#,
    )
    .bind(id.as_bytes())
    .bind(now)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(info, expires)| ReleaseKey { info, expires })
        .collect())
}

fn stored_hash(entity: &'static str, bytes: &[u8]) -> StorageResult<KeyHash> {
    KeyHash::from_stored(bytes).ok_or_else(|| StorageError::Corrupt {
        entity,
        reason: format!("auth_key_hash is {} bytes", bytes.len()),
    })
}

fn stored_key(entity: &'static str, bytes: &[u8]) -> StorageResult<Key> {
    Key::from_be_slice(bytes).map_err(|e| StorageError::Corrupt {
        entity,
        reason: e.to_string(),
    })
}

fn stored_email(value: &str) -> StorageResult<Email> {
    Email::parse(value).map_err(|e| StorageError::Corrupt {
        entity: "user",
        reason: e.to_string(),
    })
}

impl SqliteStorage {
    async fn load_item(&self, id: &ItemId, with_contents: bool) -> StorageResult<Item> {
        let _guard = self.lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        let row: Option<(Vec<u8>, Vec<u8>)> = if with_contents {
            sqlx::query_as("SELECT auth_key_hash, contents FROM items WHERE id = ?1")
                .bind(id.as_bytes())
                .fetch_optional(&mut *conn)
                .await?
        } else {
            sqlx::query_as("SELECT auth_key_hash, X'' FROM items WHERE id = ?1")
                .bind(id.as_bytes())
                .fetch_optional(&mut *conn)
                .await?
        };
        let (hash, contents) = row.ok_or_else(|| item_not_found(id))?;
        let release_keys = live_release_keys(&mut conn, id, current_timestamp()).await?;

        Ok(Item {
            id: *id,
            auth_key_hash: stored_hash("item", &hash)?,
            contents,
            release_keys,
        })
    }
}

#[async_trait]
impl RecordStorage for SqliteStorage {
    async fn insert_user(&self, user: &User, should_already_exist: bool) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists = user_exists(&mut tx, &user.email).await?;
        check_precondition("user", &user.email, exists, should_already_exist)?;

        sqlx::query(
            r#"
            INSERT INTO users (email, auth_key_hash, private_info, public_key)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(email) DO UPDATE SET
                auth_key_hash = excluded.auth_key_hash,
                private_info = excluded.private_info,
                public_key = excluded.public_key
            "#,
        )
        .bind(user.email.as_str())
        .bind(user.auth_key_hash.as_bytes().as_slice())
        .bind(user.private_info.as_slice())
        .bind(user.public_key.as_bytes().as_slice())
        .execute(&mut *tx)
        .await?;

        replace_messages(&mut tx, &user.email, &user.messages).await?;
        upsert_description(&mut tx, &user.email, &user.description).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_item(&self, item: &Item, should_already_exist: bool) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists = item_exists(&mut tx, &item.id).await?;
        check_precondition("item", &item.id, exists, should_already_exist)?;

        sqlx::query(
            r#"
            INSERT INTO items (id, auth_key_hash, contents) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                auth_key_hash = excluded.auth_key_hash,
                contents = excluded.contents
            "#,
        )
        .bind(item.id.as_bytes())
        .bind(item.auth_key_hash.as_bytes().as_slice())
        .bind(item.contents.as_slice())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM release_keys WHERE item_id = ?1")
            .bind(item.id.as_bytes())
            .execute(&mut *tx)
            .await?;
        for release_key in &item.release_keys {
            insert_release_key_row(&mut tx, &item.id, release_key).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, email: &Email) -> StorageResult<User> {
        let _guard = self.lock.lock().await;
        let mut conn = self.pool.acquire().await?;

        let row: Option<(Vec<u8>, Vec<u8>, Vec<u8>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT u.auth_key_hash, u.private_info, u.public_key, d.description
            FROM users u
            LEFT JOIN user_descriptions d ON d.email = u.email
            WHERE u.email = ?1
            "#,
        )
        .bind(email.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        let (hash, private_info, public_key, description) =
            row.ok_or_else(|| user_not_found(email))?;

        let messages: Vec<Vec<u8>> = sqlx::query_scalar(
            "SELECT content FROM user_messages WHERE email = ?1 ORDER BY seq ASC",
        )
        .bind(email.as_str())
        .fetch_all(&mut *conn)
        .await?;

        Ok(User {
            email: email.clone(),
            auth_key_hash: stored_hash("user", &hash)?,
            private_info,
            public_key: stored_key("user", &public_key)?,
            messages,
            description: description.unwrap_or_default(),
        })
    }

    async fn get_item(&self, id: &ItemId) -> StorageResult<Item> {
        self.load_item(id, true).await
    }

    async fn get_item_metadata(&self, id: &ItemId) -> StorageResult<Item> {
        self.load_item(id, false).await
    }

    async fn remove_user(&self, email: &Email) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for statement in [
            "DELETE FROM user_messages WHERE email = ?1",
            "DELETE FROM user_descriptions WHERE email = ?1",
            "DELETE FROM users WHERE email = ?1",
        ] {
            sqlx::query(statement)
                .bind(email.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_item(&self, id: &ItemId) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for statement in [
            "DELETE FROM release_keys WHERE item_id = ?1",
            "DELETE FROM items WHERE id = ?1",
        ] {
            sqlx::query(statement)
                .bind(id.as_bytes())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_message(&self, email: &Email, content: &[u8]) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if !user_exists(&mut tx, email).await? {
            return Err(user_not_found(email));
        }
        sqlx::query("INSERT INTO user_messages (email, content) VALUES (?1, ?2)")
            .bind(email.as_str())
            .bind(content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_user_private(
        &self,
        email: &Email,
        private_info: &[u8],
        messages: &[Vec<u8>],
    ) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET private_info = ?2 WHERE email = ?1")
            .bind(email.as_str())
            .bind(private_info)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(user_not_found(email));
        }
        replace_messages(&mut tx, email, messages).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_user_profile(
        &self,
        email: &Email,
        public_key: &Key,
        description: &str,
    ) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET public_key = ?2 WHERE email = ?1")
            .bind(email.as_str())
            .bind(public_key.as_bytes().as_slice())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(user_not_found(email));
        }
        upsert_description(&mut tx, email, description).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_release_key(
        &self,
        id: &ItemId,
        release_key: &ReleaseKey,
    ) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if !item_exists(&mut tx, id).await? {
            return Err(item_not_found(id));
        }
        insert_release_key_row(&mut tx, id, release_key).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_item_contents(&self, id: &ItemId, contents: &[u8]) -> StorageResult<()> {
        let _guard = self.lock.lock().await;

        let updated = sqlx::query("UPDATE items SET contents = ?2 WHERE id = ?1")
            .bind(id.as_bytes())
            .bind(contents)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(item_not_found(id));
        }
        Ok(())
    }

    async fn prefix_item_contents(
        &self,
        id: &ItemId,
        prefix: &[u8],
        limit: usize,
    ) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        // SQLite's || yields TEXT, so the concatenation happens here
        let old: Option<Vec<u8>> = sqlx::query_scalar("SELECT contents FROM items WHERE id = ?1")
            .bind(id.as_bytes())
            .fetch_optional(&mut *tx)
            .await?;
        let old = old.ok_or_else(|| item_not_found(id))?;

        let size = prefix.len() + old.len();
        if size > limit {
            return Err(StorageError::ContentsTooLarge {
                key: id.to_string(),
                size,
                limit,
            });
        }

        let mut contents = Vec::with_capacity(prefix.len() + old.len());
        contents.extend_from_slice(prefix);
        contents.extend_from_slice(&old);

        sqlx::query("UPDATE items SET contents = ?2 WHERE id = ?1")
            .bind(id.as_bytes())
            .bind(contents.as_slice())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn user_directory(&self) -> StorageResult<Vec<DirectoryEntry>> {
        let _guard = self.lock.lock().await;

        let rows: Vec<(String, String, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT u.email, COALESCE(d.description, ''), u.public_key
            FROM users u
            LEFT JOIN user_descriptions d ON d.email = u.email
            ORDER BY u.email ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(email, description, public_key)| {
                Ok(DirectoryEntry {
                    email: stored_email(&email)?,
                    description,
                    public_key: stored_key("user", &public_key)?,
                })
            })
            .collect()
    }

    async fn cleanup_expired(&self, now: i64) -> StorageResult<u64> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query("DELETE FROM release_keys WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        let _guard = self.lock.lock().await;

        let (users, items, release_keys): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM items),
                (SELECT COUNT(*) FROM release_keys)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StorageStats {
            users: users as u64,
            items: items as u64,
            release_keys: release_keys as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hash(n: u8) -> KeyHash {
        KeyHash::from_stored(&[n; 32]).unwrap()
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn make_user(address: &str) -> User {
        User {
            email: email(address),
            auth_key_hash: hash(1),
            private_info: b"private".to_vec(),
            public_key: Key::from(99u64),
            messages: vec![b"first".to_vec(), b"second".to_vec()],
            description: "hello there".to_string(),
        }
    }

    fn make_item(contents: &[u8]) -> Item {
        Item {
            id: ItemId::new(),
            auth_key_hash: hash(7),
            contents: contents.to_vec(),
            release_keys: vec![ReleaseKey {
                info: b"share".to_vec(),
                expires: current_timestamp() + 3600,
            }],
        }
    }

    #[tokio::test]
    async fn user_insert_then_get_roundtrip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");

        storage.insert_user(&user, false).await.unwrap();

        assert_eq!(storage.get_user(&user.email).await.unwrap(), user);
    }

    #[tokio::test]
    async fn new_user_defaults_roundtrip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = User::new(email("a@b.com"), hash(3));

        storage.insert_user(&user, false).await.unwrap();

        let stored = storage.get_user(&user.email).await.unwrap();
        assert_eq!(stored.public_key, Key::ZERO);
        assert!(stored.messages.is_empty());
        assert_eq!(stored.description, "");
    }

    #[tokio::test]
    async fn item_insert_then_get_roundtrip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(b"ciphertext");

        storage.insert_item(&item, false).await.unwrap();

        assert_eq!(storage.get_item(&item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn insert_existing_user_fails_precondition() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        storage.insert_user(&user, false).await.unwrap();

        let mut changed = user.clone();
        changed.description = "changed".to_string();
        let err = storage.insert_user(&changed, false).await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::Precondition {
                should_exist: false,
                ..
            }
        ));
        assert_eq!(storage.get_user(&user.email).await.unwrap(), user);
    }

    #[tokio::test]
    async fn replace_absent_user_fails_precondition() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");

        let err = storage.insert_user(&user, true).await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::Precondition {
                should_exist: true,
                ..
            }
        ));
        assert!(matches!(
            storage.get_user(&user.email).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn replace_existing_user_overwrites_everything() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        storage.insert_user(&user, false).await.unwrap();

        let replacement = User {
            private_info: b"new".to_vec(),
            messages: vec![],
            description: "new description".to_string(),
            ..user.clone()
        };
        storage.insert_user(&replacement, true).await.unwrap();

        assert_eq!(storage.get_user(&user.email).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn item_preconditions() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(b"X");

        assert!(matches!(
            storage.insert_item(&item, true).await,
            Err(StorageError::Precondition { .. })
        ));
        assert!(storage.get_item(&item.id).await.is_err());

        storage.insert_item(&item, false).await.unwrap();
        let mut changed = item.clone();
        changed.contents = b"Y".to_vec();
        assert!(matches!(
            storage.insert_item(&changed, false).await,
            Err(StorageError::Precondition { .. })
        ));
        assert_eq!(storage.get_item(&item.id).await.unwrap().contents, b"X");

        storage.insert_item(&changed, true).await.unwrap();
        assert_eq!(storage.get_item(&item.id).await.unwrap().contents, b"Y");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        let item = make_item(b"X");

        storage.remove_user(&user.email).await.unwrap();
        storage.remove_item(&item.id).await.unwrap();

        storage.insert_user(&user, false).await.unwrap();
        storage.insert_item(&item, false).await.unwrap();
        storage.remove_user(&user.email).await.unwrap();
        storage.remove_user(&user.email).await.unwrap();
        storage.remove_item(&item.id).await.unwrap();
        storage.remove_item(&item.id).await.unwrap();

        assert!(matches!(
            storage.get_user(&user.email).await,
            Err(StorageError::NotFound { entity: "user", .. })
        ));
        assert!(matches!(
            storage.get_item(&item.id).await,
            Err(StorageError::NotFound { entity: "item", .. })
        ));
    }

    #[tokio::test]
    async fn remove_cascades_to_auxiliary_rows() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        let item = make_item(b"X");
        storage.insert_user(&user, false).await.unwrap();
        storage.insert_item(&item, false).await.unwrap();

        storage.remove_user(&user.email).await.unwrap();
        storage.remove_item(&item.id).await.unwrap();

        // A re-created user must not inherit the old description or messages
        let fresh = User::new(user.email.clone(), hash(2));
        storage.insert_user(&fresh, false).await.unwrap();
        assert_eq!(storage.get_user(&user.email).await.unwrap(), fresh);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.items, 0);
        assert_eq!(stats.release_keys, 0);
    }

    #[tokio::test]
    async fn metadata_never_exposes_contents() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(&vec![0xAB; 3 * 1024 * 1024]);
        storage.insert_item(&item, false).await.unwrap();

        let meta = storage.get_item_metadata(&item.id).await.unwrap();

        assert!(meta.contents.is_empty());
        assert_eq!(meta.id, item.id);
        assert_eq!(meta.auth_key_hash, item.auth_key_hash);
        assert_eq!(meta.release_keys, item.release_keys);
    }

    #[tokio::test]
    async fn metadata_of_absent_item_is_not_found() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(matches!(
            storage.get_item_metadata(&ItemId::new()).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn append_message_keeps_order() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        storage.insert_user(&user, false).await.unwrap();

        storage.append_message(&user.email, b"third").await.unwrap();

        let stored = storage.get_user(&user.email).await.unwrap();
        assert_eq!(
            stored.messages,
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
    }

    #[tokio::test]
    async fn append_message_to_absent_user_fails() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(matches!(
            storage.append_message(&email("nobody@b.com"), b"hi").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_private_replaces_info_and_messages() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = make_user("a@b.com");
        storage.insert_user(&user, false).await.unwrap();

        storage
            .update_user_private(&user.email, b"folded", &[])
            .await
            .unwrap();

        let stored = storage.get_user(&user.email).await.unwrap();
        assert_eq!(stored.private_info, b"folded");
        assert!(stored.messages.is_empty());
        assert_eq!(stored.description, user.description);
    }

    #[tokio::test]
    async fn update_profile_sets_key_and_description() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let user = User::new(email("a@b.com"), hash(1));
        storage.insert_user(&user, false).await.unwrap();

        storage
            .update_user_profile(&user.email, &Key::from(5u64), "Alice")
            .await
            .unwrap();

        let stored = storage.get_user(&user.email).await.unwrap();
        assert_eq!(stored.public_key, Key::from(5u64));
        assert_eq!(stored.description, "Alice");
    }

    #[tokio::test]
    async fn updates_on_absent_records_fail() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let nobody = email("nobody@b.com");
        let missing = ItemId::new();

        assert!(storage.update_user_private(&nobody, b"x", &[]).await.is_err());
        assert!(storage
            .update_user_profile(&nobody, &Key::ZERO, "")
            .await
            .is_err());
        assert!(storage.update_item_contents(&missing, b"x").await.is_err());
        assert!(storage
            .prefix_item_contents(&missing, b"x", usize::MAX)
            .await
            .is_err());
        assert!(matches!(
            storage
                .insert_release_key(
                    &missing,
                    &ReleaseKey {
                        info: vec![],
                        expires: i64::MAX
                    }
                )
                .await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn prefix_prepends_to_binary_contents() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(&[0x00, 0xFF, 0x00]);
        storage.insert_item(&item, false).await.unwrap();

        storage
            .prefix_item_contents(&item.id, &[0xDE, 0xAD], 5)
            .await
            .unwrap();

        assert_eq!(
            storage.get_item(&item.id).await.unwrap().contents,
            vec![0xDE, 0xAD, 0x00, 0xFF, 0x00]
        );
    }

    #[tokio::test]
    async fn prefix_past_limit_leaves_item_unchanged() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(b"body");
        storage.insert_item(&item, false).await.unwrap();

        let result = storage.prefix_item_contents(&item.id, b"pre:", 7).await;

        assert!(matches!(
            result,
            Err(StorageError::ContentsTooLarge {
                size: 8,
                limit: 7,
                ..
            })
        ));
        assert_eq!(storage.get_item(&item.id).await.unwrap().contents, b"body");
    }

    #[tokio::test]
    async fn update_item_contents_replaces() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let item = make_item(b"old");
        storage.insert_item(&item, false).await.unwrap();

        storage.update_item_contents(&item.id, b"new").await.unwrap();

        let stored = storage.get_item(&item.id).await.unwrap();
        assert_eq!(stored.contents, b"new");
        assert_eq!(stored.release_keys, item.release_keys);
    }

    #[tokio::test]
    async fn expired_release_keys_are_never_returned() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let now = current_timestamp();
        let mut item = make_item(b"X");
        item.release_keys = vec![
            ReleaseKey {
                info: b"stale".to_vec(),
                expires: now - 10,
            },
            ReleaseKey {
                info: b"live".to_vec(),
                expires: now + 3600,
            },
        ];
        storage.insert_item(&item, false).await.unwrap();

        let stored = storage.get_item(&item.id).await.unwrap();
        assert_eq!(stored.release_keys.len(), 1);
        assert_eq!(stored.release_keys[0].info, b"live");

        // Still physically present until swept
        assert_eq!(storage.stats().await.unwrap().release_keys, 2);
        assert_eq!(storage.cleanup_expired(now).await.unwrap(), 1);
        assert_eq!(storage.stats().await.unwrap().release_keys, 1);
    }

    #[tokio::test]
    async fn concurrent_release_keys_are_all_kept() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let mut item = make_item(b"X");
        item.release_keys.clear();
        storage.insert_item(&item, false).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let storage = storage.clone();
            let id = item.id;
            handles.push(tokio::spawn(async move {
                storage
                    .insert_release_key(
                        &id,
                        &ReleaseKey {
                            info: vec![i],
                            expires: current_timestamp() + 3600,
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut infos: Vec<Vec<u8>> = storage
            .get_item(&item.id)
            .await
            .unwrap()
            .release_keys
            .into_iter()
            .map(|k| k.info)
            .collect();
        infos.sort();
        assert_eq!(infos, (0..8u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn directory_is_sorted_by_email() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert_user(&make_user("zed@b.com"), false).await.unwrap();
        storage
            .insert_user(&User::new(email("amy@b.com"), hash(2)), false)
            .await
            .unwrap();

        let directory = storage.user_directory().await.unwrap();

        assert_eq!(directory.len(), 2);
        assert_eq!(directory[0].email.as_str(), "amy@b.com");
        assert_eq!(directory[0].description, "");
        assert_eq!(directory[0].public_key, Key::ZERO);
        assert_eq!(directory[1].email.as_str(), "zed@b.com");
        assert_eq!(directory[1].description, "hello there");
        assert_eq!(directory[1].public_key, Key::from(99u64));
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockbox.db");
        let user = make_user("a@b.com");

        {
            let storage = SqliteStorage::new(&path).await.unwrap();
            storage.insert_user(&user, false).await.unwrap();
        }

        let storage = SqliteStorage::new(&path).await.unwrap();
        assert_eq!(storage.get_user(&user.email).await.unwrap(), user);
    }

    #[tokio::test]
    async fn empty_path_rejected() {
        assert!(matches!(
            SqliteStorage::new(Path::new("")).await,
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
