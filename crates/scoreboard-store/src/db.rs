//! The scoreboard SQLite file.
//!
//! [`Database`] owns one connection behind a mutex. Async callers hand it
//! closures, which run on tokio's blocking pool so queries never stall a
//! runtime worker.
//!
//! Backups are taken with `VACUUM INTO`, which produces a compacted,
//! transactionally consistent copy even while the live database is in WAL
//! mode.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Cloneable handle to the database; clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the file at `path`. Blocking; async code should use
    /// [`open_and_migrate`](Self::open_and_migrate).
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Open on the blocking pool, then migrate to the latest schema.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Path of the backing file, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Latest applied schema version.
    pub async fn schema_version(&self) -> StoreResult<u32> {
        self.execute(migration::current_version).await
    }

    /// Run `f` with the connection on the blocking pool.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     let count = conn.query_row("SELECT count(*) FROM players", [], |row| row.get(0))?;
    ///     Ok(count)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock()?;
            f(&conn)
        })
        .await?
    }

    /// Like [`execute`](Self::execute), with `&mut Connection` for
    /// `transaction()`.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock()?;
            f(&mut conn)
        })
        .await?
    }

    /// Count the rows of `table`. The name is checked against the schema
    /// before being spliced into the query.
    pub async fn row_count(&self, table: &'static str) -> StoreResult<i64> {
        self.execute(move |conn| {
            let known: bool = conn.query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::NotFound {
                    entity: "table",
                    id: table.to_string(),
                });
            }
            let count = conn.query_row(&format!("SELECT count(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })?;
            Ok(count)
        })
        .await
    }

    // ── backup / restore ─────────────────────────────────────────────

    /// Write a consistent copy of the database to `dest`.
    ///
    /// `dest` must not exist yet; `VACUUM INTO` refuses to overwrite.
    #[instrument(skip(self), fields(dest = %dest.as_ref().display()))]
    pub async fn backup_to(&self, dest: impl AsRef<Path>) -> StoreResult<()> {
        let dest = dest.as_ref().to_path_buf();
        if dest.exists() {
            return Err(StoreError::InvalidArgument(format!(
                "backup target already exists: {}",
                dest.display()
            )));
        }
        let dest_str = dest.to_string_lossy().into_owned();
        self.execute(move |conn| {
            conn.execute("VACUUM INTO ?1", [&dest_str])?;
            Ok(())
        })
        .await?;
        info!(dest = %dest.display(), "database backup written");
        Ok(())
    }

    /// Check that `path` is a readable database produced by this crate and
    /// return its schema version.
    pub fn inspect_backup(path: impl AsRef<Path>) -> StoreResult<u32> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::NotFound {
                entity: "backup",
                id: path.display().to_string(),
            });
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let version = migration::current_version(&conn).map_err(|_| {
            StoreError::InvalidArgument(format!(
                "{} is not a scoreboard database",
                path.display()
            ))
        })?;
        if version == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "{} has no applied migrations",
                path.display()
            )));
        }
        Ok(version)
    }

    /// Replace the database file at `target` with the backup at `backup`.
    ///
    /// No connection to `target` may be open while this runs. Stale WAL and
    /// shared-memory sidecar files of the target are removed so SQLite does
    /// not replay them over the restored copy. The backup is staged beside
    /// the target and renamed over it; restoring a file onto itself is
    /// rejected with [`StoreError::InvalidArgument`].
    pub fn restore_from(backup: impl AsRef<Path>, target: impl AsRef<Path>) -> StoreResult<u32> {
        let backup = backup.as_ref();
        let target = target.as_ref();
        let version = Self::inspect_backup(backup)?;

        if target.exists() && std::fs::canonicalize(backup)? == std::fs::canonicalize(target)? {
            return Err(StoreError::InvalidArgument(format!(
                "{} is the database being restored",
                backup.display()
            )));
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Stage next to the target so the final rename stays on one filesystem.
        let mut staged = target.as_os_str().to_owned();
        staged.push(".restoring");
        let staged = PathBuf::from(staged);
        if let Err(e) = std::fs::copy(backup, &staged) {
            let _ = std::fs::remove_file(&staged);
            return Err(e.into());
        }

        for suffix in ["-wal", "-shm"] {
            let mut sidecar = target.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                debug!(path = %sidecar.display(), "removed stale sidecar");
            }
        }
        std::fs::rename(&staged, target)?;

        info!(
            backup = %backup.display(),
            target = %target.display(),
            schema_version = version,
            "database restored"
        );
        Ok(version)
    }

    // ── pragmas ──────────────────────────────────────────────────────

    /// Journal, sync, cache and integrity settings for every connection.
    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // Readers keep going while a CLI invocation writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // 64 MiB memory-mapped I/O; the leaderboard database stays small.
        conn.pragma_update(None, "mmap_size", 67_108_864_i64)?;

        // Negative value means KiB: -16000 = ~16 MiB page cache.
        conn.pragma_update(None, "cache_size", -16_000_i32)?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // A second process waits up to 5 s for the write lock.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("database pragmas applied (WAL, mmap 64MiB, cache 16MiB)");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
