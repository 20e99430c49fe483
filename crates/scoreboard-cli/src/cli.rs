//! CLI argument definitions for scoreboard.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use scoreboard_store::MemoryKind;

use crate::config::DEFAULT_CONFIG_PATH;

/// scoreboard -- leaderboard storage, caching and maintenance.
#[derive(Parser)]
#[command(
    name = "scoreboard",
    version,
    about = "scoreboard -- leaderboard storage, caching and maintenance"
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Database file; overrides `[database] path`.
    #[arg(long, global = true, env = "SCOREBOARD_DB")]
    pub db: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply migrations.
    Init,

    /// Show database, cache and memory status.
    Status,

    /// Manage alliances.
    #[command(subcommand)]
    Alliance(AllianceCommand),

    /// Manage players.
    #[command(subcommand)]
    Player(PlayerCommand),

    /// Show the leaderboard (served through the cache).
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        /// Only players of this alliance.
        #[arg(short, long)]
        alliance: Option<String>,
    },

    /// Inspect the persistent cache tier.
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Work with the working/episodic/semantic memory stores.
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Write a consistent copy of the database to a new file.
    Backup {
        /// Destination; must not exist.
        out: PathBuf,
    },

    /// Replace the database with a backup.
    Restore {
        from: PathBuf,
        /// Overwrite an existing database.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum AllianceCommand {
    /// Create an alliance.
    Add {
        name: String,
        #[arg(long)]
        tag: Option<String>,
    },
    /// List alliances.
    List,
    /// Delete an alliance; its players stay on the board.
    Remove { name: String },
}

#[derive(Subcommand)]
pub enum PlayerCommand {
    /// Create or update a player.
    Set {
        name: String,
        #[arg(long)]
        power: i64,
        #[arg(long, default_value_t = 0)]
        kills: i64,
        #[arg(long)]
        alliance: Option<String>,
    },
    /// Show one player.
    Show { name: String },
    /// Delete a player.
    Remove { name: String },
    /// Show the most recent activity log entries.
    Log {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Read a key.
    Get { key: String },
    /// Write a key. The value is parsed as JSON, falling back to a string.
    Set {
        key: String,
        value: String,
        /// Seconds; 0 never expires. Defaults to `[cache] default_ttl_secs`.
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete a key.
    Delete { key: String },
    /// Drop expired rows.
    Purge,
    /// Drop every row.
    Clear,
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Store a memory.
    Add {
        content: String,
        #[arg(short, long, default_value = "working")]
        kind: MemoryKind,
        /// Comma-separated or repeated.
        #[arg(short, long)]
        tag: Vec<String>,
        #[arg(short, long, default_value_t = 0.5)]
        importance: f64,
    },
    /// Search memories by keyword and tag.
    Search(MemorySearchArgs),
    /// Show one memory (counts as an access).
    Show { id: uuid::Uuid },
    /// Delete a memory.
    Forget { id: uuid::Uuid },
    /// Promote frequently used or important working memories to episodic.
    Consolidate {
        #[arg(long, default_value_t = 3)]
        min_access: u64,
        #[arg(long, default_value_t = 0.8)]
        min_importance: f64,
    },
    /// Empty one store or all of them.
    Clear {
        #[arg(short, long)]
        kind: Option<MemoryKind>,
    },
    /// Show store occupancy.
    Stats,
}

#[derive(Args)]
pub struct MemorySearchArgs {
    /// Keywords; all must match.
    pub text: Option<String>,
    #[arg(short, long)]
    pub tag: Vec<String>,
    #[arg(short, long)]
    pub kind: Option<MemoryKind>,
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
    #[arg(long, default_value_t = 0.0)]
    pub min_importance: f64,
}
