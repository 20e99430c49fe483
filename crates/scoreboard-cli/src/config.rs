//! Application configuration.
//!
//! Reads `config/default.toml` (or the file passed with `--config`) into an
//! [`AppConfig`]. Every section and key is optional; a missing file yields
//! the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use scoreboard_store::{CacheConfig, EvictionPolicy, MemoryConfig};
use serde::Deserialize;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheSection,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/scoreboard.db"),
        }
    }
}

/// The `[cache]` section, in file units (seconds).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    /// `0` disables expiry.
    pub default_ttl_secs: u64,
    pub policy: EvictionPolicy,
    pub sweep_interval_secs: u64,
    pub write_through: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_entries: defaults.max_entries,
            default_ttl_secs: defaults.default_ttl.map(|d| d.as_secs()).unwrap_or(0),
            policy: defaults.policy,
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            write_through: defaults.write_through,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            default_ttl: (self.default_ttl_secs > 0)
                .then(|| Duration::from_secs(self.default_ttl_secs)),
            policy: self.policy,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            write_through: self.write_through,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`.
    ///
    /// Returns the defaults (and `false`) when the file does not exist; a
    /// file that exists but fails to parse is an error.
    pub fn load(path: &Path) -> Result<(Self, bool)> {
        if !path.exists() {
            return Ok((Self::default(), false));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok((config, true))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.cache.to_cache_config(), CacheConfig::default());
        assert_eq!(config.memory, MemoryConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            [cache]
            policy = "lfu"
            default_ttl_secs = 0

            [memory]
            working_capacity = 5
            "#,
        )
        .unwrap();

        let cache = config.cache.to_cache_config();
        assert_eq!(cache.policy, EvictionPolicy::Lfu);
        assert_eq!(cache.default_ttl, None);
        assert_eq!(cache.max_entries, 1_000);
        assert_eq!(config.memory.working_capacity, 5);
        assert_eq!(config.memory.episodic_capacity, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn policy_is_case_insensitive() {
        let config = AppConfig::parse("[cache]\npolicy = \"LRU\"").unwrap();
        assert_eq!(config.cache.policy, EvictionPolicy::Lru);
        let config = AppConfig::parse("[cache]\npolicy = \"Fifo\"").unwrap();
        assert_eq!(config.cache.policy, EvictionPolicy::Fifo);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(AppConfig::parse("[cache]\npolicy = \"mru\"").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (config, found) = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(!found);
        assert_eq!(config.database.path, PathBuf::from("data/scoreboard.db"));
    }

    #[test]
    fn repo_default_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let (config, found) = AppConfig::load(&path).unwrap();
        assert!(found);
        assert_eq!(config.cache.to_cache_config(), CacheConfig::default());
        assert_eq!(config.memory, MemoryConfig::default());
    }
}
