//! 3-layer memory manager.
//!
//! | Layer    | Default capacity | Intended lifetime            |
//! |----------|------------------|------------------------------|
//! | Working  | 50               | Current session / scratch    |
//! | Episodic | 500              | Recent events worth recalling |
//! | Semantic | 1000             | Durable facts                |
//!
//! The layers are independent, fixed-capacity stores held in RAM behind a
//! single lock. A full layer evicts its least valuable item (lowest
//! importance, then fewest accesses, then least recently accessed) before
//! accepting a new one. [`MemoryItemStore`] persists snapshots of all layers
//! to the `memory_items` table.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Which of the three stores an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Working,
    Episodic,
    Semantic,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 3] = [Self::Working, Self::Episodic, Self::Semantic];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Working => 0,
            Self::Episodic => 1,
            Self::Semantic => 2,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "working" => Ok(Self::Working),
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown memory kind: {other}"
            ))),
        }
    }
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub kind: MemoryKind,
    pub content: String,
    /// Lower-cased, trimmed, never empty.
    pub tags: BTreeSet<String>,
    /// Always within `0.0..=1.0`.
    pub importance: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Input for [`MemoryManager::store`].
#[derive(Debug, Clone)]
pub struct NewMemoryItem {
    pub content: String,
    pub tags: Vec<String>,
    pub importance: f64,
    pub metadata: serde_json::Value,
}

impl NewMemoryItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tags: Vec::new(),
            importance: 0.5,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-layer capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub working_capacity: usize,
    pub episodic_capacity: usize,
    pub semantic_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 50,
            episodic_capacity: 500,
            semantic_capacity: 1_000,
        }
    }
}

impl MemoryConfig {
    pub fn capacity(&self, kind: MemoryKind) -> usize {
        match kind {
            MemoryKind::Working => self.working_capacity,
            MemoryKind::Episodic => self.episodic_capacity,
            MemoryKind::Semantic => self.semantic_capacity,
        }
    }
}

/// Search parameters for [`MemoryManager::search`].
///
/// An item matches when it carries every tag in `tags` and every
/// whitespace-separated keyword of `text` occurs (case-insensitively) in its
/// content or one of its tags.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub kind: Option<MemoryKind>,
    /// Maximum results; `0` means unlimited.
    pub limit: usize,
    pub min_importance: f64,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            text: None,
            tags: Vec::new(),
            kind: None,
            limit: 10,
            min_importance: 0.0,
        }
    }
}

impl MemoryQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tagged<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = min;
        self
    }
}

/// Occupancy of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerStats {
    pub kind: MemoryKind,
    pub len: usize,
    pub capacity: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub layers: Vec<LayerStats>,
}

impl MemoryStats {
    pub fn total(&self) -> usize {
        self.layers.iter().map(|l| l.len).sum()
    }
}

/// Serializable dump of every layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub items: Vec<MemoryItem>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Manager
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Layer {
    items: HashMap<Uuid, MemoryItem>,
    evictions: u64,
}

impl Layer {
    /// The item to drop when the layer is full.
    fn victim(&self) -> Option<Uuid> {
        self.items
            .values()
            .min_by(|a, b| {
                a.importance
                    .total_cmp(&b.importance)
                    .then(a.access_count.cmp(&b.access_count))
                    .then(a.last_accessed.cmp(&b.last_accessed))
                    .then(a.id.cmp(&b.id))
            })
            .map(|item| item.id)
    }
}

/// Three fixed-capacity memory stores with tag/keyword search.
#[derive(Debug)]
pub struct MemoryManager {
    config: MemoryConfig,
    layers: Mutex<[Layer; 3]>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            layers: Mutex::new(Default::default()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn layers(&self) -> MutexGuard<'_, [Layer; 3]> {
        self.layers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new item in `kind`, evicting from that layer if it is full.
    #[instrument(skip_all, fields(kind = %kind))]
    pub fn store(&self, kind: MemoryKind, input: NewMemoryItem) -> StoreResult<Uuid> {
        let content = input.content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidArgument(
                "memory content must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let item = MemoryItem {
            id: Uuid::now_v7(),
            kind,
            content: content.to_string(),
            tags: normalize_tags(&input.tags),
            importance: clamp_importance(input.importance),
            metadata: input.metadata,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };
        let id = item.id;

        let mut layers = self.layers();
        self.insert_into(&mut layers, item)?;
        debug!(%id, "memory stored");
        Ok(id)
    }

    /// Place `item` in its layer, evicting one victim if the layer is full.
    fn insert_into(&self, layers: &mut [Layer; 3], item: MemoryItem) -> StoreResult<()> {
        let kind = item.kind;
        let capacity = self.config.capacity(kind);
        if capacity == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "{kind} memory store disabled (capacity 0)"
            )));
        }

        let layer = &mut layers[kind.index()];
        while layer.items.len() >= capacity {
            let Some(victim) = layer.victim() else { break };
            layer.items.remove(&victim);
            layer.evictions += 1;
            debug!(kind = %kind, %victim, "memory evicted");
        }
        layer.items.insert(item.id, item);
        Ok(())
    }

    /// Fetch an item from any layer, recording the access.
    pub fn retrieve(&self, id: Uuid) -> Option<MemoryItem> {
        let mut layers = self.layers();
        layers.iter_mut().find_map(|layer| {
            layer.items.get_mut(&id).map(|item| {
                item.access_count += 1;
                item.last_accessed = Utc::now();
                item.clone()
            })
        })
    }

    /// Find matching items, best match first. Does not record accesses.
    pub fn search(&self, query: &MemoryQuery) -> Vec<MemoryItem> {
        let required_tags = normalize_tags(&query.tags);
        let keywords: Vec<String> = query
            .text
            .as_deref()
            .map(|t| t.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let layers = self.layers();
        let mut scored: Vec<(usize, &MemoryItem)> = layers
            .iter()
            .flat_map(|layer| layer.items.values())
            .filter(|item| query.kind.is_none_or(|k| item.kind == k))
            .filter(|item| item.importance >= query.min_importance)
            .filter(|item| required_tags.is_subset(&item.tags))
            .filter_map(|item| {
                relevance(item, &keywords).map(|score| (score + required_tags.len(), item))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then(b.importance.total_cmp(&a.importance))
                .then(b.last_accessed.cmp(&a.last_accessed))
                .then(a.id.cmp(&b.id))
        });

        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        scored
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Remove an item from whichever layer holds it.
    pub fn forget(&self, id: Uuid) -> bool {
        let removed = self
            .layers()
            .iter_mut()
            .any(|layer| layer.items.remove(&id).is_some());
        if removed {
            debug!(%id, "memory forgotten");
        }
        removed
    }

    /// Empty one layer, or all of them. Returns the number of items removed.
    pub fn clear(&self, kind: Option<MemoryKind>) -> usize {
        let mut layers = self.layers();
        let mut removed = 0;
        for k in MemoryKind::ALL {
            if kind.is_none_or(|want| want == k) {
                let layer = &mut layers[k.index()];
                removed += layer.items.len();
                layer.items.clear();
            }
        }
        debug!(?kind, removed, "memory cleared");
        removed
    }

    pub fn len(&self, kind: MemoryKind) -> usize {
        self.layers()[kind.index()].items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers().iter().all(|layer| layer.items.is_empty())
    }

    pub fn stats(&self) -> MemoryStats {
        let layers = self.layers();
        MemoryStats {
            layers: MemoryKind::ALL
                .iter()
                .map(|&kind| {
                    let layer = &layers[kind.index()];
                    LayerStats {
                        kind,
                        len: layer.items.len(),
                        capacity: self.config.capacity(kind),
                        evictions: layer.evictions,
                    }
                })
                .collect(),
        }
    }

    /// Promote working items that were accessed at least `min_access` times
    /// or carry at least `min_importance` into the episodic layer.
    ///
    /// Returns how many items moved. Nothing moves while the episodic layer
    /// is disabled.
    pub fn consolidate(&self, min_access: u64, min_importance: f64) -> usize {
        if self.config.episodic_capacity == 0 {
            return 0;
        }

        let mut layers = self.layers();
        let mut promoted: Vec<MemoryItem> = layers[MemoryKind::Working.index()]
            .items
            .values()
            .filter(|item| item.access_count >= min_access || item.importance >= min_importance)
            .cloned()
            .collect();
        // Oldest first, so when episodic overflows the newest promotions stay.
        promoted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let moved = promoted.len();
        for mut item in promoted {
            layers[MemoryKind::Working.index()].items.remove(&item.id);
            item.kind = MemoryKind::Episodic;
            // Capacity was checked above, so this cannot fail.
            let _ = self.insert_into(&mut layers, item);
        }

        if moved > 0 {
            info!(moved, "working memory consolidated into episodic");
        }
        moved
    }

    /// Copy out every item, ordered by layer then creation time.
    pub fn snapshot(&self) -> MemorySnapshot {
        let layers = self.layers();
        let mut items: Vec<MemoryItem> = layers
            .iter()
            .flat_map(|layer| layer.items.values().cloned())
            .collect();
        items.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        MemorySnapshot { items }
    }

    /// Replace all layers with the contents of `snapshot`.
    ///
    /// Items for a disabled layer are skipped and items beyond a layer's
    /// capacity are evicted as usual. Returns how many items were loaded.
    pub fn restore(&self, snapshot: MemorySnapshot) -> usize {
        let mut layers = self.layers();
        for layer in layers.iter_mut() {
            layer.items.clear();
        }

        let mut loaded = 0;
        for mut item in snapshot.items {
            item.tags = normalize_tags(&item.tags);
            item.importance = clamp_importance(item.importance);
            if self.insert_into(&mut layers, item).is_ok() {
                loaded += 1;
            }
        }
        debug!(loaded, "memory restored from snapshot");
        loaded
    }
}

// ── helpers ──────────────────────────────────────────────────────────

fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn clamp_importance(importance: f64) -> f64 {
    if importance.is_nan() {
        0.5
    } else {
        importance.clamp(0.0, 1.0)
    }
}

/// Keyword relevance of `item`, or `None` if some keyword is missing.
///
/// Each keyword scores its occurrences in the content plus two for every tag
/// containing it.
fn relevance(item: &MemoryItem, keywords: &[String]) -> Option<usize> {
    let content = item.content.to_lowercase();
    let mut score = 0;
    for keyword in keywords {
        let in_content = content.matches(keyword.as_str()).count();
        let in_tags = item.tags.iter().filter(|t| t.contains(keyword.as_str())).count();
        if in_content + in_tags == 0 {
            return None;
        }
        score += in_content + 2 * in_tags;
    }
    Some(score)
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence (SQLite `memory_items` table)
// ═══════════════════════════════════════════════════════════════════════

/// Saves and loads [`MemorySnapshot`]s.
#[derive(Clone)]
pub struct MemoryItemStore {
    db: Database,
}

type MemoryRow = (String, String, String, String, f64, String, i64, i64, i64);

impl MemoryItemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace the persisted items with `snapshot` in one transaction.
    #[instrument(skip(self, snapshot), fields(items = snapshot.items.len()))]
    pub async fn save(&self, snapshot: &MemorySnapshot) -> StoreResult<usize> {
        let mut rows = Vec::with_capacity(snapshot.items.len());
        for item in &snapshot.items {
            rows.push((
                item.id.to_string(),
                item.kind.as_str(),
                item.content.clone(),
                serde_json::to_string(&item.tags)?,
                item.importance,
                serde_json::to_string(&item.metadata)?,
                i64::try_from(item.access_count).unwrap_or(i64::MAX),
                item.created_at.timestamp_millis(),
                item.last_accessed.timestamp_millis(),
            ));
        }

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM memory_items", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO memory_items \
                         (id, kind, content, tags, importance, metadata, access_count, created_at, last_accessed) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    )?;
                    for row in &rows {
                        stmt.execute(rusqlite::params![
                            row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await
    }

    /// Load every persisted item.
    #[instrument(skip(self))]
    pub async fn load(&self) -> StoreResult<MemorySnapshot> {
        let rows: Vec<MemoryRow> = self
            .db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, content, tags, importance, metadata, access_count, created_at, last_accessed \
                     FROM memory_items ORDER BY kind, created_at",
                )?;
                let rows: Vec<MemoryRow> = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, kind, content, tags, importance, metadata, access, created, accessed) in rows {
            items.push(MemoryItem {
                id: Uuid::parse_str(&id)
                    .map_err(|e| StoreError::InvalidArgument(format!("bad memory id {id}: {e}")))?,
                kind: kind.parse()?,
                content,
                tags: serde_json::from_str(&tags)?,
                importance,
                metadata: serde_json::from_str(&metadata)?,
                access_count: u64::try_from(access).unwrap_or(0),
                created_at: from_millis(created),
                last_accessed: from_millis(accessed),
            });
        }
        Ok(MemorySnapshot { items })
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> MemoryManager {
        MemoryManager::new(MemoryConfig {
            working_capacity: 2,
            episodic_capacity: 3,
            semantic_capacity: 0,
        })
    }

    #[test]
    fn store_and_retrieve_bumps_access() {
        let mm = MemoryManager::default();
        let id = mm
            .store(
                MemoryKind::Semantic,
                NewMemoryItem::new("  Wolves lead the server  ")
                    .tags(["Alliance", " ranking ", ""])
                    .importance(1.7),
            )
            .unwrap();

        let item = mm.retrieve(id).unwrap();
        assert_eq!(item.content, "Wolves lead the server");
        assert_eq!(
            item.tags.iter().cloned().collect::<Vec<_>>(),
            vec!["alliance".to_string(), "ranking".to_string()]
        );
        assert_eq!(item.importance, 1.0);
        assert_eq!(item.access_count, 1);
        assert_eq!(mm.retrieve(id).unwrap().access_count, 2);
        assert!(mm.retrieve(Uuid::now_v7()).is_none());
    }

    #[test]
    fn empty_content_and_disabled_layer_rejected() {
        let mm = small();
        assert!(matches!(
            mm.store(MemoryKind::Working, NewMemoryItem::new("   ")),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            mm.store(MemoryKind::Semantic, NewMemoryItem::new("x")),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn full_layer_evicts_lowest_importance() {
        let mm = small();
        let low = mm
            .store(MemoryKind::Working, NewMemoryItem::new("low").importance(0.1))
            .unwrap();
        let high = mm
            .store(MemoryKind::Working, NewMemoryItem::new("high").importance(0.9))
            .unwrap();
        let mid = mm
            .store(MemoryKind::Working, NewMemoryItem::new("mid").importance(0.5))
            .unwrap();

        assert_eq!(mm.len(MemoryKind::Working), 2);
        assert!(mm.retrieve(low).is_none());
        assert!(mm.retrieve(high).is_some());
        assert!(mm.retrieve(mid).is_some());
        assert_eq!(mm.stats().layers[0].evictions, 1);
    }

    #[test]
    fn equal_importance_evicts_least_accessed() {
        let mm = small();
        let read = mm.store(MemoryKind::Working, NewMemoryItem::new("read")).unwrap();
        let unread = mm.store(MemoryKind::Working, NewMemoryItem::new("unread")).unwrap();
        mm.retrieve(read);

        mm.store(MemoryKind::Working, NewMemoryItem::new("newcomer")).unwrap();
        assert!(mm.retrieve(unread).is_none());
        assert!(mm.retrieve(read).is_some());
    }

    #[test]
    fn layers_are_independent() {
        let mm = small();
        mm.store(MemoryKind::Working, NewMemoryItem::new("w1")).unwrap();
        mm.store(MemoryKind::Working, NewMemoryItem::new("w2")).unwrap();
        mm.store(MemoryKind::Episodic, NewMemoryItem::new("e1")).unwrap();

        assert_eq!(mm.len(MemoryKind::Working), 2);
        assert_eq!(mm.len(MemoryKind::Episodic), 1);
        assert_eq!(mm.clear(Some(MemoryKind::Working)), 2);
        assert_eq!(mm.len(MemoryKind::Episodic), 1);
        assert_eq!(mm.clear(None), 1);
        assert!(mm.is_empty());
    }

    #[test]
    fn search_requires_all_keywords_and_tags() {
        let mm = MemoryManager::default();
        mm.store(
            MemoryKind::Episodic,
            NewMemoryItem::new("Ash won the arena match").tags(["arena", "pvp"]),
        )
        .unwrap();
        mm.store(
            MemoryKind::Episodic,
            NewMemoryItem::new("Ash joined the Wolves").tags(["alliance"]),
        )
        .unwrap();
        mm.store(
            MemoryKind::Semantic,
            NewMemoryItem::new("Arena resets weekly").tags(["arena"]),
        )
        .unwrap();

        let hits = mm.search(&MemoryQuery::text("ash"));
        assert_eq!(hits.len(), 2);

        let hits = mm.search(&MemoryQuery::text("ASH arena"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Ash won the arena match");

        let hits = mm.search(&MemoryQuery::default().tagged(["Arena"]));
        assert_eq!(hits.len(), 2);

        let hits = mm.search(&MemoryQuery::default().tagged(["arena"]).in_kind(MemoryKind::Semantic));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, MemoryKind::Semantic);

        assert!(mm.search(&MemoryQuery::text("dragon")).is_empty());
    }

    #[test]
    fn search_orders_by_relevance_then_importance() {
        let mm = MemoryManager::default();
        mm.store(
            MemoryKind::Working,
            NewMemoryItem::new("raid once").importance(0.9),
        )
        .unwrap();
        mm.store(
            MemoryKind::Working,
            NewMemoryItem::new("raid raid raid").importance(0.1),
        )
        .unwrap();
        mm.store(
            MemoryKind::Working,
            NewMemoryItem::new("another raid").importance(0.95),
        )
        .unwrap();

        let hits = mm.search(&MemoryQuery::text("raid"));
        let contents: Vec<&str> = hits.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["raid raid raid", "another raid", "raid once"]);

        let hits = mm.search(&MemoryQuery::text("raid").limit(1).min_importance(0.5));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "another raid");
    }

    #[test]
    fn search_does_not_count_as_access() {
        let mm = MemoryManager::default();
        let id = mm.store(MemoryKind::Working, NewMemoryItem::new("quiet")).unwrap();
        mm.search(&MemoryQuery::text("quiet"));
        assert_eq!(mm.retrieve(id).unwrap().access_count, 1);
    }

    #[test]
    fn forget_removes_from_any_layer() {
        let mm = MemoryManager::default();
        let id = mm.store(MemoryKind::Semantic, NewMemoryItem::new("fact")).unwrap();
        assert!(mm.forget(id));
        assert!(!mm.forget(id));
        assert!(mm.retrieve(id).is_none());
    }

    #[test]
    fn consolidate_moves_accessed_or_important_items() {
        let mm = MemoryManager::default();
        let busy = mm.store(MemoryKind::Working, NewMemoryItem::new("busy")).unwrap();
        let vital = mm
            .store(MemoryKind::Working, NewMemoryItem::new("vital").importance(0.95))
            .unwrap();
        let idle = mm.store(MemoryKind::Working, NewMemoryItem::new("idle")).unwrap();
        mm.retrieve(busy);
        mm.retrieve(busy);

        assert_eq!(mm.consolidate(2, 0.9), 2);
        assert_eq!(mm.len(MemoryKind::Working), 1);
        assert_eq!(mm.len(MemoryKind::Episodic), 2);
        assert_eq!(mm.retrieve(busy).unwrap().kind, MemoryKind::Episodic);
        assert_eq!(mm.retrieve(vital).unwrap().kind, MemoryKind::Episodic);
        assert_eq!(mm.retrieve(idle).unwrap().kind, MemoryKind::Working);
    }

    #[test]
    fn snapshot_restore_respects_capacity() {
        let big = MemoryManager::default();
        for i in 0..4 {
            big.store(
                MemoryKind::Working,
                NewMemoryItem::new(format!("note {i}")).importance(i as f64 / 10.0),
            )
            .unwrap();
        }
        big.store(MemoryKind::Semantic, NewMemoryItem::new("fact")).unwrap();
        let snapshot = big.snapshot();
        assert_eq!(snapshot.items.len(), 5);

        let restored = small();
        // Semantic is disabled in `small`, and working keeps only two.
        assert_eq!(restored.restore(snapshot), 4);
        assert_eq!(restored.len(MemoryKind::Working), 2);
        let kept: Vec<String> = restored
            .search(&MemoryQuery::text("note"))
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(kept, vec!["note 3".to_string(), "note 2".to_string()]);
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("Episodic".parse::<MemoryKind>().unwrap(), MemoryKind::Episodic);
        assert!("dream".parse::<MemoryKind>().is_err());
    }

    #[tokio::test]
    async fn item_store_roundtrips_snapshot() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = MemoryItemStore::new(db);

        let mm = MemoryManager::default();
        let id = mm
            .store(
                MemoryKind::Episodic,
                NewMemoryItem::new("Ash reached 1M power")
                    .tags(["milestone"])
                    .metadata(serde_json::json!({"player": "ash"})),
            )
            .unwrap();
        mm.retrieve(id);

        assert_eq!(store.save(&mm.snapshot()).await.unwrap(), 1);
        // Saving again replaces rather than appends.
        assert_eq!(store.save(&mm.snapshot()).await.unwrap(), 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.items.len(), 1);
        let item = &loaded.items[0];
        assert_eq!(item.id, id);
        assert_eq!(item.kind, MemoryKind::Episodic);
        assert_eq!(item.access_count, 1);
        assert!(item.tags.contains("milestone"));
        assert_eq!(item.metadata["player"], "ash");
    }
}
