//! Versioned schema upgrades.
//!
//! Each step is a batch of SQL tagged with a version. Applied versions are
//! recorded in `_migrations`; [`run_all`] only runs the steps above the
//! highest recorded one, so calling it on every open is safe.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// One schema step.
struct Migration {
    /// Strictly increasing across [`MIGRATIONS`].
    version: u32,
    /// Stored in `_migrations` for humans inspecting the file.
    description: &'static str,
    /// Executed with `execute_batch`.
    sql: &'static str,
}

/// Every schema step, oldest first. New steps are appended.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: alliances, players, activity log",
        sql: r#"
            CREATE TABLE alliances (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL UNIQUE,
                tag        TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE players (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                alliance_id INTEGER REFERENCES alliances(id) ON DELETE SET NULL,
                power       INTEGER NOT NULL DEFAULT 0,
                kills       INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_players_alliance ON players(alliance_id);
            CREATE INDEX idx_players_rank ON players(power DESC, kills DESC);

            CREATE TABLE activity_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id  INTEGER REFERENCES players(id) ON DELETE CASCADE,
                action     TEXT NOT NULL,
                detail     TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_activity_created ON activity_log(created_at);
        "#,
    },
    Migration {
        version: 2,
        description: "persistent cache tier: cache_entries table",
        sql: r#"
            CREATE TABLE cache_entries (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_cache_entries_expiry ON cache_entries(expires_at);
        "#,
    },
    Migration {
        version: 3,
        description: "memory stores: memory_items table",
        sql: r#"
            CREATE TABLE memory_items (
                id            TEXT PRIMARY KEY,
                kind          TEXT NOT NULL CHECK(kind IN ('working','episodic','semantic')),
                content       TEXT NOT NULL,
                tags          TEXT NOT NULL DEFAULT '[]',
                importance    REAL NOT NULL DEFAULT 0.5,
                metadata      TEXT NOT NULL DEFAULT 'null',
                access_count  INTEGER NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL
            );
            CREATE INDEX idx_memory_items_kind ON memory_items(kind);
        "#,
    },
];

/// Bring `conn` up to [`latest_version`].
///
/// Synchronous; [`crate::Database::run_migrations`] calls it from the
/// blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| failed(0, "create _migrations table", e))?;

    let current = current_version(conn)?;
    let mut applied = 0usize;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "schema already current");
    } else {
        info!(
            from_version = current,
            applied,
            to_version = latest_version(),
            "schema migrated"
        );
    }
    Ok(())
}

/// Highest version recorded in `_migrations`; 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| failed(0, "read current version", e))
}

/// Highest version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn failed(version: u32, step: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{step}: {err}"),
    }
}

/// Apply a single migration inside a transaction. Dropping the transaction
/// on the error path rolls it back.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    debug!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| failed(migration.version, "begin transaction", e))?;

    let outcome = tx
        .execute_batch(migration.sql)
        .map_err(|e| failed(migration.version, "execute sql", e))
        .and_then(|()| {
            tx.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().timestamp()
                ],
            )
            .map_err(|e| failed(migration.version, "record migration", e))
        });

    if let Err(err) = outcome {
        warn!(version = migration.version, %err, "migration failed, rolling back");
        return Err(err);
    }

    tx.commit()
        .map_err(|e| failed(migration.version, "commit", e))?;
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
