//! Players, alliances and the activity log.
//!
//! [`LeaderboardStore`] is a thin CRUD layer over the `players`,
//! `alliances` and `activity_log` tables. Every player write also appends an
//! activity row in the same transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A guild/clan players can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alliance {
    pub id: i64,
    pub name: String,
    pub tag: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub alliance_id: Option<i64>,
    pub power: i64,
    pub kills: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for [`LeaderboardStore::upsert_player`]. Players are keyed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlayer {
    pub name: String,
    pub alliance_id: Option<i64>,
    pub power: i64,
    pub kills: i64,
}

/// One row of `activity_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub player_id: Option<i64>,
    pub action: String,
    pub detail: Option<String>,
    pub created_at: i64,
}

const PLAYER_COLUMNS: &str = "id, name, alliance_id, power, kills, created_at, updated_at";

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        alliance_id: row.get(2)?,
        power: row.get(3)?,
        kills: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn alliance_from_row(row: &Row<'_>) -> rusqlite::Result<Alliance> {
    Ok(Alliance {
        id: row.get(0)?,
        name: row.get(1)?,
        tag: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn validate_name(name: &str, entity: &str) -> StoreResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidArgument(format!(
            "{entity} name must not be empty"
        )));
    }
    Ok(name.to_string())
}

fn log_activity(
    conn: &Connection,
    player_id: Option<i64>,
    action: &str,
    detail: Option<&str>,
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO activity_log (player_id, action, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![player_id, action, detail, now],
    )?;
    Ok(())
}

/// CRUD operations on the leaderboard tables.
#[derive(Clone)]
pub struct LeaderboardStore {
    db: Database,
}

impl LeaderboardStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── alliances ────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn create_alliance(&self, name: &str, tag: Option<&str>) -> StoreResult<i64> {
        let name = validate_name(name, "alliance")?;
        let tag = tag.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                match conn.execute(
                    "INSERT INTO alliances (name, tag, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, tag, now],
                ) {
                    Ok(_) => Ok(conn.last_insert_rowid()),
                    Err(e) if is_unique_violation(&e) => Err(StoreError::InvalidArgument(
                        format!("alliance already exists: {name}"),
                    )),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    pub async fn get_alliance(&self, id: i64) -> StoreResult<Alliance> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, name, tag, created_at FROM alliances WHERE id = ?1",
                    [id],
                    alliance_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "alliance",
                    id: id.to_string(),
                })
            })
            .await
    }

    pub async fn find_alliance(&self, name: &str) -> StoreResult<Alliance> {
        let name = name.trim().to_string();
        self.db
            .execute(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT id, name, tag, created_at FROM alliances WHERE name = ?1",
                        [&name],
                        alliance_from_row,
                    )
                    .optional()?;
                found.ok_or(StoreError::NotFound {
                    entity: "alliance",
                    id: name,
                })
            })
            .await
    }

    pub async fn list_alliances(&self) -> StoreResult<Vec<Alliance>> {
        self.db
            .execute(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, tag, created_at FROM alliances ORDER BY name")?;
                let alliances = stmt
                    .query_map([], alliance_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(alliances)
            })
            .await
    }

    /// Delete an alliance. Its members stay on the board without one.
    #[instrument(skip(self))]
    pub async fn delete_alliance(&self, id: i64) -> StoreResult<()> {
        self.db
            .execute(move |conn| {
                let deleted = conn.execute("DELETE FROM alliances WHERE id = ?1", [id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "alliance",
                        id: id.to_string(),
                    });
                }
                Ok(())
            })
            .await
    }

    // ── players ──────────────────────────────────────────────────────

    /// Insert a player or update the one with the same name.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn upsert_player(&self, input: NewPlayer) -> StoreResult<i64> {
        let name = validate_name(&input.name, "player")?;
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row("SELECT id FROM players WHERE name = ?1", [&name], |row| {
                        row.get(0)
                    })
                    .optional()?;

                let (id, action) = match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE players SET alliance_id = ?2, power = ?3, kills = ?4, updated_at = ?5 \
                             WHERE id = ?1",
                            rusqlite::params![id, input.alliance_id, input.power, input.kills, now],
                        )?;
                        (id, "updated")
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO players (name, alliance_id, power, kills, created_at, updated_at) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                            rusqlite::params![name, input.alliance_id, input.power, input.kills, now],
                        )?;
                        (tx.last_insert_rowid(), "created")
                    }
                };

                let detail = format!("power={} kills={}", input.power, input.kills);
                log_activity(&tx, Some(id), action, Some(&detail), now)?;
                tx.commit()?;
                Ok(id)
            })
            .await
    }

    pub async fn get_player(&self, id: i64) -> StoreResult<Player> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1"),
                    [id],
                    player_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "player",
                    id: id.to_string(),
                })
            })
            .await
    }

    pub async fn find_player(&self, name: &str) -> StoreResult<Player> {
        let name = name.trim().to_string();
        self.db
            .execute(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE name = ?1"),
                        [&name],
                        player_from_row,
                    )
                    .optional()?;
                found.ok_or(StoreError::NotFound {
                    entity: "player",
                    id: name,
                })
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_player(&self, id: i64) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let name: Option<String> = tx
                    .query_row("SELECT name FROM players WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let Some(name) = name else {
                    return Err(StoreError::NotFound {
                        entity: "player",
                        id: id.to_string(),
                    });
                };
                // The player's own history cascades away; keep a tombstone.
                tx.execute("DELETE FROM players WHERE id = ?1", [id])?;
                log_activity(&tx, None, "deleted", Some(&name), now)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Highest power first, then kills, then name.
    pub async fn top_players(&self, limit: u32, alliance_id: Option<i64>) -> StoreResult<Vec<Player>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PLAYER_COLUMNS} FROM players \
                     WHERE (?1 IS NULL OR alliance_id = ?1) \
                     ORDER BY power DESC, kills DESC, name ASC LIMIT ?2"
                ))?;
                let players = stmt
                    .query_map(rusqlite::params![alliance_id, limit], player_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(players)
            })
            .await
    }

    /// Newest entries first.
    pub async fn recent_activity(&self, limit: u32) -> StoreResult<Vec<LogEntry>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, player_id, action, detail, created_at FROM activity_log \
                     ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let entries = stmt
                    .query_map([limit], |row| {
                        Ok(LogEntry {
                            id: row.get(0)?,
                            player_id: row.get(1)?,
                            action: row.get(2)?,
                            detail: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> LeaderboardStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        LeaderboardStore::new(db)
    }

    fn player(name: &str, power: i64, kills: i64, alliance_id: Option<i64>) -> NewPlayer {
        NewPlayer {
            name: name.to_string(),
            alliance_id,
            power,
            kills,
        }
    }

    #[tokio::test]
    async fn alliance_crud() {
        let board = setup().await;
        let id = board.create_alliance("Wolves", Some(" WLF ")).await.unwrap();

        let alliance = board.get_alliance(id).await.unwrap();
        assert_eq!(alliance.name, "Wolves");
        assert_eq!(alliance.tag.as_deref(), Some("WLF"));
        assert_eq!(board.find_alliance("Wolves").await.unwrap().id, id);

        let dup = board.create_alliance("Wolves", None).await;
        assert!(matches!(dup, Err(StoreError::InvalidArgument(_))));

        board.delete_alliance(id).await.unwrap();
        assert!(matches!(
            board.get_alliance(id).await,
            Err(StoreError::NotFound { entity: "alliance", .. })
        ));
        assert!(board.delete_alliance(id).await.is_err());
    }

    #[tokio::test]
    async fn upsert_player_updates_by_name() {
        let board = setup().await;
        let id = board.upsert_player(player("ash", 100, 1, None)).await.unwrap();
        let same = board.upsert_player(player("ash", 250, 4, None)).await.unwrap();
        assert_eq!(id, same);

        let p = board.find_player("ash").await.unwrap();
        assert_eq!(p.power, 250);
        assert_eq!(p.kills, 4);

        let log = board.recent_activity(10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, "updated");
        assert_eq!(log[1].action, "created");
    }

    #[tokio::test]
    async fn empty_name_rejected() {
        let board = setup().await;
        let err = board.upsert_player(player("  ", 1, 1, None)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn top_players_ordering_and_filter() {
        let board = setup().await;
        let wolves = board.create_alliance("Wolves", None).await.unwrap();
        board.upsert_player(player("cid", 500, 2, Some(wolves))).await.unwrap();
        board.upsert_player(player("bea", 500, 9, None)).await.unwrap();
        board.upsert_player(player("abe", 500, 9, Some(wolves))).await.unwrap();
        board.upsert_player(player("dan", 900, 0, None)).await.unwrap();

        let names: Vec<String> = board
            .top_players(10, None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["dan", "abe", "bea", "cid"]);

        let top2 = board.top_players(2, None).await.unwrap();
        assert_eq!(top2.len(), 2);

        let wolves_only: Vec<String> = board
            .top_players(10, Some(wolves))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(wolves_only, vec!["abe", "cid"]);
    }

    #[tokio::test]
    async fn delete_player_leaves_tombstone() {
        let board = setup().await;
        let id = board.upsert_player(player("eve", 10, 0, None)).await.unwrap();
        board.delete_player(id).await.unwrap();

        assert!(matches!(
            board.get_player(id).await,
            Err(StoreError::NotFound { entity: "player", .. })
        ));
        let log = board.recent_activity(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "deleted");
        assert_eq!(log[0].detail.as_deref(), Some("eve"));
        assert_eq!(log[0].player_id, None);
    }
}
