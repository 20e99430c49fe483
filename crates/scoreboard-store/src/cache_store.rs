//! Persistent (second) tier for [`CacheManager`](crate::cache::CacheManager).
//!
//! The in-memory tier consults a [`PersistentStore`] on a miss. Values cross
//! this boundary as JSON text so one table can back caches of any value
//! type. [`SqliteCacheStore`] is the implementation over the
//! `cache_entries` table.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A serialized cache entry as held by the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// JSON-encoded value.
    pub value: String,
    /// Absolute expiry in epoch milliseconds; `None` never expires.
    pub expires_at: Option<i64>,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
}

impl StoredEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    /// Milliseconds left before expiry, `None` when the entry never expires.
    pub fn remaining_millis(&self, now_ms: i64) -> Option<i64> {
        self.expires_at.map(|at| (at - now_ms).max(0))
    }
}

/// Backing store queried on an in-memory miss.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch an entry, expired or not. Expiry is judged by the caller.
    async fn load(&self, key: &str) -> StoreResult<Option<StoredEntry>>;

    /// Insert or replace an entry.
    async fn save(&self, key: &str, entry: StoredEntry) -> StoreResult<()>;

    /// Remove an entry, returning whether it existed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Remove every entry whose key starts with `prefix`.
    async fn remove_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Remove every entry.
    async fn clear(&self) -> StoreResult<usize>;

    /// Remove entries whose expiry is at or before `now_ms`.
    async fn purge_expired(&self, now_ms: i64) -> StoreResult<usize>;

    /// Number of stored entries, including expired ones not yet purged.
    async fn len(&self) -> StoreResult<usize>;
}

/// [`PersistentStore`] over the `cache_entries` table.
#[derive(Clone)]
pub struct SqliteCacheStore {
    db: Database,
}

impl SqliteCacheStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PersistentStore for SqliteCacheStore {
    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let entry = conn
                    .query_row(
                        "SELECT value, expires_at, created_at FROM cache_entries WHERE key = ?1",
                        [&key],
                        |row| {
                            Ok(StoredEntry {
                                value: row.get(0)?,
                                expires_at: row.get(1)?,
                                created_at: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(entry)
            })
            .await
    }

    #[instrument(skip(self, entry))]
    async fn save(&self, key: &str, entry: StoredEntry) -> StoreResult<()> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, expires_at, created_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     expires_at = excluded.expires_at, created_at = excluded.created_at",
                    rusqlite::params![key, entry.value, entry.expires_at, entry.created_at],
                )?;
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM cache_entries WHERE key = ?1", [&key])?;
                Ok(deleted > 0)
            })
            .await
    }

    #[instrument(skip(self))]
    async fn remove_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let prefix = prefix.to_string();
        self.db
            .execute(move |conn| {
                // substr() instead of LIKE so `%` and `_` in keys need no escaping.
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
                    [&prefix],
                )?;
                Ok(deleted)
            })
            .await
    }

    async fn clear(&self) -> StoreResult<usize> {
        let deleted = self
            .db
            .execute(|conn| Ok(conn.execute("DELETE FROM cache_entries", [])?))
            .await?;
        debug!(deleted, "persistent cache cleared");
        Ok(deleted)
    }

    async fn purge_expired(&self, now_ms: i64) -> StoreResult<usize> {
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    [now_ms],
                )?;
                Ok(deleted)
            })
            .await
    }

    async fn len(&self) -> StoreResult<usize> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT count(*) FROM cache_entries", [], |row| row.get(0))?;
                Ok(usize::try_from(count).unwrap_or(0))
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> SqliteCacheStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SqliteCacheStore::new(db)
    }

    fn entry(value: &str, expires_at: Option<i64>) -> StoredEntry {
        StoredEntry {
            value: value.to_string(),
            expires_at,
            created_at: 1_000,
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let e = entry("1", Some(5_000));
        assert!(!e.is_expired(4_999));
        assert!(e.is_expired(5_000));
        assert_eq!(e.remaining_millis(4_000), Some(1_000));
        assert_eq!(e.remaining_millis(9_000), Some(0));
        assert_eq!(entry("1", None).remaining_millis(9_000), None);
    }

    #[tokio::test]
    async fn save_load_overwrite_remove() {
        let store = setup_store().await;
        assert_eq!(store.load("k").await.unwrap(), None);

        store.save("k", entry("\"a\"", None)).await.unwrap();
        store.save("k", entry("\"b\"", Some(42))).await.unwrap();

        let loaded = store.load("k").await.unwrap().unwrap();
        assert_eq!(loaded.value, "\"b\"");
        assert_eq!(loaded.expires_at, Some(42));
        assert_eq!(store.len().await.unwrap(), 1);

        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn remove_prefix_matches_literally() {
        let store = setup_store().await;
        for key in ["top:all:10", "top:7:10", "top_x", "player:ash"] {
            store.save(key, entry("1", None)).await.unwrap();
        }

        assert_eq!(store.remove_prefix("top:").await.unwrap(), 2);
        assert!(store.load("top_x").await.unwrap().is_some());
        assert!(store.load("player:ash").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_only_touches_expired_rows() {
        let store = setup_store().await;
        store.save("old", entry("1", Some(100))).await.unwrap();
        store.save("fresh", entry("2", Some(10_000))).await.unwrap();
        store.save("forever", entry("3", None)).await.unwrap();

        assert_eq!(store.purge_expired(5_000).await.unwrap(), 1);
        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.load("fresh").await.unwrap().is_some());
        assert!(store.load("forever").await.unwrap().is_some());

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
