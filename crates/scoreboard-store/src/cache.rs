//! Two-tier cache: a size-bounded in-memory map in front of an optional
//! [`PersistentStore`].
//!
//! Entries carry an optional TTL. When the memory tier is full, one entry is
//! evicted according to the configured [`EvictionPolicy`], after expired
//! entries have been dropped. A miss in memory falls through to the
//! persistent tier; a live row found there is promoted back into memory
//! with whatever TTL it has left.
//!
//! Recency, frequency and insertion order are tracked with a logical tick
//! counter rather than wall-clock time, so victim selection is
//! deterministic.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache_store::{PersistentStore, StoredEntry, now_millis};
use crate::error::{StoreError, StoreResult};

// ── policy & config ──────────────────────────────────────────────────

/// Which entry to drop when the memory tier is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently read or written.
    #[default]
    Lru,
    /// Fewest reads; ties go to the least recently used.
    Lfu,
    /// Oldest insertion. Overwriting a key keeps its original position.
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            other => Err(StoreError::Config(format!(
                "unknown eviction policy: {other} (expected lru, lfu or fifo)"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EvictionPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Tuning knobs for a [`CacheManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Capacity of the memory tier. `0` disables it.
    pub max_entries: usize,
    /// TTL applied by [`CacheManager::set`]. `None` means entries never expire.
    pub default_ttl: Option<Duration>,
    pub policy: EvictionPolicy,
    /// Period of the background sweeper.
    pub sweep_interval: Duration,
    /// Mirror every write into the persistent tier.
    pub write_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            default_ttl: Some(Duration::from_secs(300)),
            policy: EvictionPolicy::Lru,
            sweep_interval: Duration::from_secs(60),
            write_through: true,
        }
    }
}

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    persistent_hits: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Lookups answered from either tier.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hits served by the persistent tier (a subset of [`hits`](Self::hits)).
    pub fn persistent_hits(&self) -> u64 {
        self.persistent_hits.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Entries dropped to make room.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries dropped because their TTL ran out.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a value between 0.0 and 1.0 (returns 0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.persistent_hits,
            &self.inserts,
            &self.evictions,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} (persistent={}) misses={} rate={:.2}% inserts={} evictions={} expirations={}",
            self.hits(),
            self.persistent_hits(),
            self.misses(),
            self.hit_rate() * 100.0,
            self.inserts(),
            self.evictions(),
            self.expirations(),
        )
    }
}

// ── memory tier ──────────────────────────────────────────────────────

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    inserted: u64,
    last_access: u64,
    reads: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Absent,
}

struct MemoryTier<V> {
    entries: HashMap<String, Entry<V>>,
    tick: u64,
}

impl<V: Clone> MemoryTier<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Lookup<V> {
        match self.entries.get(key).map(|entry| entry.is_expired(now)) {
            None => Lookup::Absent,
            Some(true) => {
                self.entries.remove(key);
                Lookup::Expired
            }
            Some(false) => {
                let tick = self.next_tick();
                match self.entries.get_mut(key) {
                    Some(entry) => {
                        entry.last_access = tick;
                        entry.reads += 1;
                        Lookup::Hit(entry.value.clone())
                    }
                    None => Lookup::Absent,
                }
            }
        }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn victim(&self, policy: EvictionPolicy) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| match policy {
                EvictionPolicy::Lru => (e.last_access, 0),
                EvictionPolicy::Lfu => (e.reads, e.last_access),
                EvictionPolicy::Fifo => (e.inserted, 0),
            })
            .map(|(key, _)| key.clone())
    }
}

/// Outcome of a memory-tier insert, reported to the stats.
#[derive(Default)]
struct InsertOutcome {
    expired: usize,
    evicted: Option<String>,
}

// ── cache manager ────────────────────────────────────────────────────

/// Size-bounded TTL cache with pluggable eviction and an optional
/// persistent second tier.
///
/// # Example
///
/// ```ignore
/// let cache: CacheManager<Vec<Player>> = CacheManager::builder("leaderboard")
///     .max_entries(256)
///     .default_ttl(Some(Duration::from_secs(30)))
///     .policy(EvictionPolicy::Lfu)
///     .persistent(Arc::new(SqliteCacheStore::new(db.clone())))
///     .build();
///
/// let top = cache
///     .get_or_insert_with("top:all:10", || board.top_players(10, None))
///     .await?;
/// ```
pub struct CacheManager<V> {
    name: &'static str,
    config: CacheConfig,
    memory: Mutex<MemoryTier<V>>,
    store: Option<Arc<dyn PersistentStore>>,
    stats: CacheStats,
}

impl<V> CacheManager<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start building a new cache manager.
    pub fn builder(name: &'static str) -> CacheManagerBuilder<V> {
        CacheManagerBuilder {
            name,
            config: CacheConfig::default(),
            store: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Memory-only cache with the given configuration.
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self::builder(name).config(config).build()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Whether a persistent tier is attached.
    pub fn is_tiered(&self) -> bool {
        self.store.is_some()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier<V>> {
        // Nothing panics while the lock is held, so a poisoned guard still
        // protects a consistent map.
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up `key` in memory, then in the persistent tier.
    pub async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        let lookup = self.memory().lookup(key, Instant::now());
        let mut expired = match lookup {
            Lookup::Hit(value) => {
                CacheStats::bump(&self.stats.hits, 1);
                debug!(cache = self.name, key, "cache hit");
                return Ok(Some(value));
            }
            Lookup::Expired => {
                debug!(cache = self.name, key, "cache entry expired");
                true
            }
            Lookup::Absent => false,
        };

        let found = match self.load_persistent(key).await? {
            Lookup::Hit(value) => Some(value),
            Lookup::Expired => {
                expired = true;
                None
            }
            Lookup::Absent => None,
        };
        // One lookup counts at most one expiration, whichever tier held it.
        if expired {
            CacheStats::bump(&self.stats.expirations, 1);
        }

        match found {
            Some(value) => {
                CacheStats::bump(&self.stats.hits, 1);
                CacheStats::bump(&self.stats.persistent_hits, 1);
                debug!(cache = self.name, key, "cache hit (persistent tier)");
                Ok(Some(value))
            }
            None => {
                CacheStats::bump(&self.stats.misses, 1);
                debug!(cache = self.name, key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Query the persistent tier and promote a live entry into memory.
    async fn load_persistent(&self, key: &str) -> StoreResult<Lookup<V>> {
        let Some(store) = &self.store else {
            return Ok(Lookup::Absent);
        };
        let Some(stored) = store.load(key).await? else {
            return Ok(Lookup::Absent);
        };

        let now_ms = now_millis();
        if stored.is_expired(now_ms) {
            store.remove(key).await?;
            return Ok(Lookup::Expired);
        }

        let value = match serde_json::from_str::<V>(&stored.value) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    cache = self.name,
                    key,
                    %err,
                    "persisted cache entry deserialization failed, evicting"
                );
                store.remove(key).await?;
                return Ok(Lookup::Absent);
            }
        };

        let remaining = stored
            .remaining_millis(now_ms)
            .map(|ms| Duration::from_millis(ms.unsigned_abs()));
        self.insert_memory(key, value.clone(), remaining);
        Ok(Lookup::Hit(value))
    }

    /// Insert with the configured default TTL.
    pub async fn set(&self, key: &str, value: V) -> StoreResult<()> {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    /// Insert with an explicit TTL; `None` never expires.
    pub async fn set_with_ttl(&self, key: &str, value: V, ttl: Option<Duration>) -> StoreResult<()> {
        if let (Some(store), true) = (&self.store, self.config.write_through) {
            let now_ms = now_millis();
            let entry = StoredEntry {
                value: serde_json::to_string(&value)?,
                expires_at: ttl.map(|ttl| {
                    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
                }),
                created_at: now_ms,
            };
            store.save(key, entry).await?;
        }

        self.insert_memory(key, value, ttl);
        CacheStats::bump(&self.stats.inserts, 1);
        debug!(cache = self.name, key, ?ttl, "cache insert");
        Ok(())
    }

    fn insert_memory(&self, key: &str, value: V, ttl: Option<Duration>) {
        if self.config.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        // A TTL past the end of the clock never expires.
        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));

        let outcome = {
            let mut memory = self.memory();
            let tick = memory.next_tick();
            let mut outcome = InsertOutcome::default();

            if let Some(entry) = memory.entries.get_mut(key) {
                entry.value = value;
                entry.expires_at = expires_at;
                entry.last_access = tick;
            } else {
                if memory.entries.len() >= self.config.max_entries {
                    outcome.expired = memory.sweep(now);
                }
                if memory.entries.len() >= self.config.max_entries {
                    if let Some(victim) = memory.victim(self.config.policy) {
                        memory.entries.remove(&victim);
                        outcome.evicted = Some(victim);
                    }
                }
                memory.entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        expires_at,
                        inserted: tick,
                        last_access: tick,
                        reads: 0,
                    },
                );
            }
            outcome
        };

        if outcome.expired > 0 {
            CacheStats::bump(&self.stats.expirations, outcome.expired as u64);
        }
        if let Some(victim) = outcome.evicted {
            CacheStats::bump(&self.stats.evictions, 1);
            debug!(
                cache = self.name,
                victim = %victim,
                policy = %self.config.policy,
                "cache eviction"
            );
        }
    }

    /// Remove `key` from both tiers. Returns whether either held it.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let in_memory = self.memory().entries.remove(key).is_some();
        let in_store = match &self.store {
            Some(store) => store.remove(key).await?,
            None => false,
        };
        debug!(cache = self.name, key, "cache delete");
        Ok(in_memory || in_store)
    }

    /// Remove every key starting with `prefix` from both tiers.
    pub async fn invalidate_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let removed_memory = {
            let mut memory = self.memory();
            let before = memory.entries.len();
            memory.entries.retain(|key, _| !key.starts_with(prefix));
            before - memory.entries.len()
        };
        let removed_store = match &self.store {
            Some(store) => store.remove_prefix(prefix).await?,
            None => 0,
        };
        debug!(
            cache = self.name,
            prefix,
            removed_memory,
            removed_store,
            "cache prefix invalidated"
        );
        Ok(removed_memory.max(removed_store))
    }

    /// Whether a live entry for `key` is in the memory tier. Does not count
    /// as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.memory()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of entries in the memory tier, including expired ones the
    /// sweeper has not reached yet.
    pub fn len(&self) -> usize {
        self.memory().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys of the memory tier, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .memory()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Empty both tiers.
    pub async fn clear(&self) -> StoreResult<()> {
        self.memory().entries.clear();
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        debug!(cache = self.name, "cache cleared");
        Ok(())
    }

    /// Drop every expired entry from the memory tier.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.memory().sweep(Instant::now());
        if removed > 0 {
            CacheStats::bump(&self.stats.expirations, removed as u64);
            debug!(cache = self.name, removed, "expired entries swept");
        }
        removed
    }

    /// Drop expired rows from the persistent tier.
    pub async fn purge_persistent(&self) -> StoreResult<usize> {
        match &self.store {
            Some(store) => store.purge_expired(now_millis()).await,
            None => Ok(0),
        }
    }

    /// Try the cache, and if missing, call the async loader, cache the
    /// result, and return it.
    pub async fn get_or_insert_with<F, Fut>(&self, key: &str, loader: F) -> StoreResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<V>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set(key, value.clone()).await?;
        Ok(value)
    }

    /// Start the background sweeper for this cache.
    ///
    /// Every `sweep_interval` the task drops expired memory entries and
    /// purges expired persistent rows. It holds only a weak reference, so it
    /// ends on its own once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(10));
        let name = self.name;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.sweep_expired();
                        if let Err(err) = cache.purge_persistent().await {
                            warn!(cache = name, %err, "persistent cache purge failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(cache = name, "cache sweeper stopped");
        });

        info!(cache = name, period_ms = period.as_millis() as u64, "cache sweeper started");
        SweeperHandle { shutdown, task }
    }
}

/// Handle to a running sweeper. Dropping it also stops the task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(%err, "cache sweeper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder<V> {
    name: &'static str,
    config: CacheConfig,
    store: Option<Arc<dyn PersistentStore>>,
    _marker: std::marker::PhantomData<V>,
}

impl<V> CacheManagerBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Replace the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn write_through(mut self, enabled: bool) -> Self {
        self.config.write_through = enabled;
        self
    }

    /// Attach a persistent second tier.
    pub fn persistent(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> CacheManager<V> {
        debug!(
            name = self.name,
            max_entries = self.config.max_entries,
            ttl = ?self.config.default_ttl,
            policy = %self.config.policy,
            tiered = self.store.is_some(),
            "cache manager created"
        );

        CacheManager {
            name: self.name,
            config: self.config,
            memory: Mutex::new(MemoryTier::new()),
            store: self.store,
            stats: CacheStats::default(),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestRecord {
        id: u64,
        name: String,
    }

    fn record(id: u64, name: &str) -> TestRecord {
        TestRecord {
            id,
            name: name.to_string(),
        }
    }

    fn make_cache(max: usize, policy: EvictionPolicy) -> CacheManager<TestRecord> {
        CacheManager::builder("test")
            .max_entries(max)
            .default_ttl(Some(Duration::from_secs(60)))
            .policy(policy)
            .build()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.set("rec:1", record(1, "Alice")).await.unwrap();

        assert_eq!(cache.get("rec:1").await.unwrap(), Some(record(1, "Alice")));
        assert_eq!(cache.get("nonexistent").await.unwrap(), None);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.set("k", record(1, "old")).await.unwrap();
        cache.set("k", record(2, "new")).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").await.unwrap(), Some(record(2, "new")));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.set("a", record(1, "a")).await.unwrap();
        cache.set("b", record(2, "b")).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        assert_eq!(cache.keys(), vec!["b".to_string()]);

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_counts_as_miss() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache
            .set_with_ttl("short", record(1, "s"), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        cache.set_with_ttl("forever", record(2, "f"), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(!cache.contains("short"));
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("forever").await.unwrap(), Some(record(2, "f")));
        assert_eq!(cache.stats().expirations(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn ttl_beyond_the_clock_never_expires() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache
            .set_with_ttl("far", record(1, "f"), Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();

        assert!(cache.contains("far"));
        assert_eq!(cache.get("far").await.unwrap(), Some(record(1, "f")));
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[tokio::test]
    async fn invalidate_prefix_spares_other_keys() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        for key in ["top:all:10", "top:3:5", "player:1"] {
            cache.set(key, record(1, key)).await.unwrap();
        }

        assert_eq!(cache.invalidate_prefix("top:").await.unwrap(), 2);
        assert_eq!(cache.keys(), vec!["player:1".to_string()]);
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_used() {
        let cache = make_cache(2, EvictionPolicy::Lru);
        cache.set("a", record(1, "a")).await.unwrap();
        cache.set("b", record(2, "b")).await.unwrap();
        // Touch `a` so `b` becomes the LRU entry.
        cache.get("a").await.unwrap();
        cache.set("c", record(3, "c")).await.unwrap();

        assert_eq!(cache.keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[tokio::test]
    async fn lfu_evicts_least_frequently_used() {
        let cache = make_cache(2, EvictionPolicy::Lfu);
        cache.set("a", record(1, "a")).await.unwrap();
        cache.set("b", record(2, "b")).await.unwrap();
        for _ in 0..3 {
            cache.get("a").await.unwrap();
        }
        cache.get("b").await.unwrap();
        // `b` was read more recently, but `a` was read more often.
        cache.set("c", record(3, "c")).await.unwrap();

        assert_eq!(cache.keys(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn lfu_ties_fall_back_to_recency() {
        let cache = make_cache(2, EvictionPolicy::Lfu);
        cache.set("a", record(1, "a")).await.unwrap();
        cache.set("b", record(2, "b")).await.unwrap();
        cache.set("c", record(3, "c")).await.unwrap();

        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn fifo_ignores_reads_and_overwrites() {
        let cache = make_cache(2, EvictionPolicy::Fifo);
        cache.set("a", record(1, "a")).await.unwrap();
        cache.set("b", record(2, "b")).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("a", record(10, "a2")).await.unwrap();
        cache.set("c", record(3, "c")).await.unwrap();

        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_go_before_live_victims() {
        let cache = make_cache(2, EvictionPolicy::Lru);
        cache
            .set_with_ttl("stale", record(1, "s"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        cache.set("live", record(2, "l")).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        cache.set("new", record(3, "n")).await.unwrap();

        assert_eq!(cache.keys(), vec!["live".to_string(), "new".to_string()]);
        assert_eq!(cache.stats().evictions(), 0);
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[tokio::test]
    async fn zero_capacity_disables_memory_tier() {
        let cache = make_cache(0, EvictionPolicy::Lru);
        cache.set("a", record(1, "a")).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_insert_with_caches() {
        let cache = make_cache(10, EvictionPolicy::Lru);

        let val = cache
            .get_or_insert_with("rec:4", || async { Ok(record(4, "Dave")) })
            .await
            .unwrap();
        assert_eq!(val.name, "Dave");

        let val2 = cache
            .get_or_insert_with("rec:4", || async { Ok(record(999, "Should not appear")) })
            .await
            .unwrap();
        assert_eq!(val2.name, "Dave");
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn loader_error_is_not_cached() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        let result = cache
            .get_or_insert_with("k", || async {
                Err(StoreError::InvalidArgument("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(
            CacheManager::<TestRecord>::builder("swept")
                .max_entries(10)
                .default_ttl(Some(Duration::from_secs(1)))
                .sweep_interval(Duration::from_secs(5))
                .build(),
        );
        cache.set("a", record(1, "a")).await.unwrap();
        let sweeper = cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations(), 1);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_cache_dropped() {
        let cache = Arc::new(
            CacheManager::<TestRecord>::builder("dropped")
                .sweep_interval(Duration::from_secs(1))
                .build(),
        );
        let sweeper = cache.spawn_sweeper();
        drop(cache);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sweeper.is_finished());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!(" lfu ".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!(matches!(
            "random".parse::<EvictionPolicy>(),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn policy_deserializes_through_from_str() {
        let policy: EvictionPolicy = serde_json::from_str(r#""LFU""#).unwrap();
        assert_eq!(policy, EvictionPolicy::Lfu);
        assert_eq!(serde_json::to_string(&policy).unwrap(), r#""lfu""#);

        let err = serde_json::from_str::<EvictionPolicy>(r#""mru""#).unwrap_err();
        assert!(err.to_string().contains("unknown eviction policy"));
    }

    #[test]
    fn stats_display_and_reset() {
        let stats = CacheStats::default();
        stats.hits.store(50, Ordering::Relaxed);
        stats.misses.store(50, Ordering::Relaxed);
        let display = format!("{stats}");
        assert!(display.contains("hits=50"));
        assert!(display.contains("misses=50"));
        assert!(display.contains("50.00%"));

        stats.reset();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }
}
