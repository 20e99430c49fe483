//! Subcommand handlers.
//!
//! Every handler opens the database itself, so each invocation starts with
//! an empty in-memory cache tier and reads through to `cache_entries`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use scoreboard_store::{
    CacheManager, Database, LeaderboardStore, MemoryItemStore, MemoryManager, MemoryQuery,
    NewMemoryItem, NewPlayer, Player, SqliteCacheStore,
};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::helpers::{format_timestamp, open_database, split_tags};
use crate::cli::{AllianceCommand, CacheCommand, MemoryCommand, PlayerCommand};

/// Key prefix of cached leaderboard pages.
const TOP_PREFIX: &str = "top:";

fn leaderboard_cache(config: &AppConfig, db: &Database) -> CacheManager<Vec<Player>> {
    CacheManager::builder("leaderboard")
        .config(config.cache.to_cache_config())
        .persistent(Arc::new(SqliteCacheStore::new(db.clone())))
        .build()
}

fn top_key(alliance_id: Option<i64>, limit: u32) -> String {
    match alliance_id {
        Some(id) => format!("{TOP_PREFIX}{id}:{limit}"),
        None => format!("{TOP_PREFIX}all:{limit}"),
    }
}

/// Drop cached leaderboard pages after a write that can reorder them.
async fn invalidate_leaderboard(config: &AppConfig, db: &Database) -> Result<()> {
    let removed = leaderboard_cache(config, db)
        .invalidate_prefix(TOP_PREFIX)
        .await
        .context("failed to invalidate cached leaderboard")?;
    debug!(removed, "leaderboard cache invalidated");
    Ok(())
}

// ---------------------------------------------------------------------------
// init / status
// ---------------------------------------------------------------------------

pub async fn init(config: &AppConfig) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let version = db.schema_version().await?;
    println!();
    println!("  Database: {}", config.database.path.display());
    println!("  Schema version: {version}");
    println!();
    Ok(())
}

pub async fn status(config: &AppConfig) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let cache = config.cache.to_cache_config();

    println!();
    println!("  Database: {}", config.database.path.display());
    println!("  Schema version: {}", db.schema_version().await?);
    for table in [
        "alliances",
        "players",
        "activity_log",
        "cache_entries",
        "memory_items",
    ] {
        println!("    {table:<14} {}", db.row_count(table).await?);
    }

    println!();
    println!(
        "  Cache: policy={} max_entries={} ttl={} write_through={}",
        cache.policy,
        cache.max_entries,
        cache
            .default_ttl
            .map(|ttl| format!("{}s", ttl.as_secs()))
            .unwrap_or_else(|| "never".to_string()),
        cache.write_through,
    );

    let memory = load_memory(config, &db).await?;
    println!("  Memory:");
    for layer in memory.stats().layers {
        println!("    {:<9} {}/{}", layer.kind, layer.len, layer.capacity);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// alliance / player / top
// ---------------------------------------------------------------------------

pub async fn alliance(config: &AppConfig, cmd: AllianceCommand) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let board = LeaderboardStore::new(db.clone());

    match cmd {
        AllianceCommand::Add { name, tag } => {
            let id = board.create_alliance(&name, tag.as_deref()).await?;
            println!("  Created alliance {name} (id {id})");
        }
        AllianceCommand::List => {
            let alliances = board.list_alliances().await?;
            if alliances.is_empty() {
                println!("  No alliances.");
            }
            for a in alliances {
                let tag = a.tag.map(|t| format!("[{t}] ")).unwrap_or_default();
                println!("  {:>4}  {tag}{}", a.id, a.name);
            }
        }
        AllianceCommand::Remove { name } => {
            let alliance = board.find_alliance(&name).await?;
            board.delete_alliance(alliance.id).await?;
            invalidate_leaderboard(config, &db).await?;
            println!("  Removed alliance {name}");
        }
    }
    Ok(())
}

pub async fn player(config: &AppConfig, cmd: PlayerCommand) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let board = LeaderboardStore::new(db.clone());

    match cmd {
        PlayerCommand::Set {
            name,
            power,
            kills,
            alliance,
        } => {
            let alliance_id = match alliance {
                Some(alliance) => Some(board.find_alliance(&alliance).await?.id),
                None => None,
            };
            let id = board
                .upsert_player(NewPlayer {
                    name: name.clone(),
                    alliance_id,
                    power,
                    kills,
                })
                .await?;
            invalidate_leaderboard(config, &db).await?;
            println!("  Saved {name} (id {id})");
        }
        PlayerCommand::Show { name } => {
            let player = board.find_player(&name).await?;
            let alliance = match player.alliance_id {
                Some(id) => board.get_alliance(id).await?.name,
                None => "-".to_string(),
            };
            println!();
            println!("  {}", player.name);
            println!("    Alliance: {alliance}");
            println!("    Power:    {}", player.power);
            println!("    Kills:    {}", player.kills);
            println!("    Updated:  {}", format_timestamp(player.updated_at));
            println!();
        }
        PlayerCommand::Remove { name } => {
            let player = board.find_player(&name).await?;
            board.delete_player(player.id).await?;
            invalidate_leaderboard(config, &db).await?;
            println!("  Removed {name}");
        }
        PlayerCommand::Log { limit } => {
            for entry in board.recent_activity(limit).await? {
                println!(
                    "  {}  {:<8} {}",
                    format_timestamp(entry.created_at),
                    entry.action,
                    entry.detail.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

pub async fn top(config: &AppConfig, limit: u32, alliance: Option<&str>) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let board = LeaderboardStore::new(db.clone());
    let alliance_id = match alliance {
        Some(name) => Some(board.find_alliance(name).await?.id),
        None => None,
    };

    let cache = leaderboard_cache(config, &db);
    let key = top_key(alliance_id, limit);
    let players = cache
        .get_or_insert_with(&key, || board.top_players(limit, alliance_id))
        .await?;
    debug!(key = %key, stats = %cache.stats(), "leaderboard served");

    if players.is_empty() {
        println!("  No players.");
    }
    for (rank, p) in players.iter().enumerate() {
        println!(
            "  {:>3}. {:<20} {:>12} power {:>8} kills",
            rank + 1,
            p.name,
            p.power,
            p.kills
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

pub async fn cache(config: &AppConfig, cmd: CacheCommand) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let store = Arc::new(SqliteCacheStore::new(db));
    let cache: CacheManager<serde_json::Value> = CacheManager::builder("cli")
        .config(config.cache.to_cache_config())
        .persistent(store)
        .build();

    match cmd {
        CacheCommand::Get { key } => match cache.get(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("  (miss)"),
        },
        CacheCommand::Set { key, value, ttl } => {
            let value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value));
            let ttl = match ttl {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => cache.config().default_ttl,
            };
            cache.set_with_ttl(&key, value, ttl).await?;
            println!("  Stored {key}");
        }
        CacheCommand::Delete { key } => {
            if cache.delete(&key).await? {
                println!("  Deleted {key}");
            } else {
                println!("  {key} not found");
            }
        }
        CacheCommand::Purge => {
            let purged = cache.purge_persistent().await?;
            println!("  Purged {purged} expired entries");
        }
        CacheCommand::Clear => {
            cache.clear().await?;
            println!("  Cache cleared");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// memory
// ---------------------------------------------------------------------------

async fn load_memory(config: &AppConfig, db: &Database) -> Result<MemoryManager> {
    let snapshot = MemoryItemStore::new(db.clone())
        .load()
        .await
        .context("failed to load memory items")?;
    let memory = MemoryManager::new(config.memory);
    let loaded = memory.restore(snapshot);
    debug!(loaded, "memory loaded");
    Ok(memory)
}

async fn save_memory(db: &Database, memory: &MemoryManager) -> Result<()> {
    let saved = MemoryItemStore::new(db.clone())
        .save(&memory.snapshot())
        .await
        .context("failed to save memory items")?;
    debug!(saved, "memory saved");
    Ok(())
}

pub async fn memory(config: &AppConfig, cmd: MemoryCommand) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    let memory = load_memory(config, &db).await?;

    match cmd {
        MemoryCommand::Add {
            content,
            kind,
            tag,
            importance,
        } => {
            let id = memory.store(
                kind,
                NewMemoryItem::new(content)
                    .tags(split_tags(&tag))
                    .importance(importance),
            )?;
            save_memory(&db, &memory).await?;
            println!("  Stored {kind} memory {id}");
        }
        MemoryCommand::Search(args) => {
            let mut query = MemoryQuery {
                text: args.text,
                ..MemoryQuery::default()
            }
            .tagged(split_tags(&args.tag))
            .limit(args.limit)
            .min_importance(args.min_importance);
            if let Some(kind) = args.kind {
                query = query.in_kind(kind);
            }

            let results = memory.search(&query);
            if results.is_empty() {
                println!("  No matches.");
            }
            for item in &results {
                let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
                println!(
                    "  {}  {:<8} {:.2}  {}  [{}]",
                    item.id,
                    item.kind,
                    item.importance,
                    item.content,
                    tags.join(", ")
                );
            }
        }
        MemoryCommand::Show { id } => {
            let Some(item) = memory.retrieve(id) else {
                bail!("memory {id} not found");
            };
            save_memory(&db, &memory).await?;
            println!();
            println!("  {} ({})", item.id, item.kind);
            println!("    {}", item.content);
            println!(
                "    Tags: {}",
                item.tags.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            println!("    Importance: {:.2}", item.importance);
            println!("    Accessed: {} times", item.access_count);
            println!(
                "    Created: {}",
                format_timestamp(item.created_at.timestamp())
            );
            println!();
        }
        MemoryCommand::Forget { id } => {
            if !memory.forget(id) {
                bail!("memory {id} not found");
            }
            save_memory(&db, &memory).await?;
            println!("  Forgot {id}");
        }
        MemoryCommand::Consolidate {
            min_access,
            min_importance,
        } => {
            let moved = memory.consolidate(min_access, min_importance);
            save_memory(&db, &memory).await?;
            println!("  Moved {moved} working memories to episodic");
        }
        MemoryCommand::Clear { kind } => {
            let removed = memory.clear(kind);
            save_memory(&db, &memory).await?;
            println!("  Removed {removed} memories");
        }
        MemoryCommand::Stats => {
            let stats = memory.stats();
            for layer in &stats.layers {
                println!("  {:<9} {:>5}/{:<5}", layer.kind, layer.len, layer.capacity);
            }
            println!("  total     {:>5}", stats.total());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// backup / restore
// ---------------------------------------------------------------------------

pub async fn backup(config: &AppConfig, out: &Path) -> Result<()> {
    let db = open_database(&config.database.path).await?;
    db.backup_to(out)
        .await
        .with_context(|| format!("failed to back up to {}", out.display()))?;
    println!("  Backup written to {}", out.display());
    Ok(())
}

pub fn restore(config: &AppConfig, from: &Path, yes: bool) -> Result<()> {
    let target = &config.database.path;
    if target.exists() && !yes {
        bail!(
            "{} already exists; pass --yes to overwrite it",
            target.display()
        );
    }
    let version = Database::restore_from(from, target)
        .with_context(|| format!("failed to restore from {}", from.display()))?;
    info!(schema_version = version, "restore complete");
    println!(
        "  Restored {} from {} (schema version {version})",
        target.display(),
        from.display()
    );
    Ok(())
}
