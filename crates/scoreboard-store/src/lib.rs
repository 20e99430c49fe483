//! # scoreboard-store
//!
//! Storage engine for the scoreboard leaderboard.
//!
//! Provides SQLite-backed persistence with WAL mode, a two-tier cache
//! (bounded in-memory map with TTL and LRU/LFU/FIFO eviction in front of a
//! SQLite table), and a 3-layer memory manager (working / episodic /
//! semantic).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  CacheManager   (HashMap + TTL + eviction)   │
//! │      └─ miss ─▶ SqliteCacheStore             │
//! ├──────────────────────────────────────────────┤
//! │  MemoryManager  (working/episodic/semantic)  │
//! │      └─ snapshots ─▶ MemoryItemStore         │
//! ├──────────────────────────────────────────────┤
//! │  LeaderboardStore (players, alliances, log)  │
//! ├──────────────────────────────────────────────┤
//! │  Database (rusqlite WAL) + Migrations        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use scoreboard_store::{CacheManager, Database, EvictionPolicy, SqliteCacheStore};
//!
//! let db = Database::open_and_migrate("data/scoreboard.db").await?;
//! let cache: CacheManager<String> = CacheManager::builder("strings")
//!     .max_entries(1000)
//!     .policy(EvictionPolicy::Lru)
//!     .persistent(Arc::new(SqliteCacheStore::new(db.clone())))
//!     .build();
//! ```

pub mod cache;
pub mod cache_store;
pub mod db;
pub mod error;
pub mod leaderboard;
pub mod memory;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{
    CacheConfig, CacheManager, CacheManagerBuilder, CacheStats, EvictionPolicy, SweeperHandle,
};
pub use cache_store::{PersistentStore, SqliteCacheStore, StoredEntry};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use leaderboard::{Alliance, LeaderboardStore, LogEntry, NewPlayer, Player};
pub use memory::{
    LayerStats, MemoryConfig, MemoryItem, MemoryItemStore, MemoryKind, MemoryManager,
    MemoryQuery, MemorySnapshot, MemoryStats, NewMemoryItem,
};
