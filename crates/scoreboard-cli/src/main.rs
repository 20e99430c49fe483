//! CLI entry point for scoreboard.
//!
//! This binary provides the `scoreboard` command with subcommands for
//! managing the leaderboard database, inspecting the persistent cache tier,
//! working with the memory stores, and taking backups.

mod cli;
mod commands;
mod config;
mod helpers;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (mut config, found) = AppConfig::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    helpers::init_tracing(level);

    if found {
        info!(path = %cli.config.display(), "configuration loaded");
    } else {
        debug!(path = %cli.config.display(), "no configuration file, using defaults");
    }

    match cli.command {
        Commands::Init => commands::init(&config).await,
        Commands::Status => commands::status(&config).await,
        Commands::Alliance(cmd) => commands::alliance(&config, cmd).await,
        Commands::Player(cmd) => commands::player(&config, cmd).await,
        Commands::Top { limit, alliance } => {
            commands::top(&config, limit, alliance.as_deref()).await
        }
        Commands::Cache(cmd) => commands::cache(&config, cmd).await,
        Commands::Memory(cmd) => commands::memory(&config, cmd).await,
        Commands::Backup { out } => commands::backup(&config, &out).await,
        Commands::Restore { from, yes } => commands::restore(&config, &from, yes),
    }
}
