//! Memory store
//!
//! Single source of truth for memory items: owns the in-memory cache, the
//! pattern inverted index, and the bidirectional association graph. All
//! three live behind one mutex so every operation on an item, its index
//! entry, and its graph edges happens in the same critical section.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::storage::{Persistence, PersistenceError};

use super::item::{MemoryItem, MemoryQuery, NewMemory};

/// Default weight for association edges rebuilt from persisted rows
const REBUILT_EDGE_WEIGHT: f64 = 0.5;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Memory store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Referenced memory id is absent
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// Detected asymmetric association, out-of-range value, or index mismatch
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),
    /// Cache saturated
    #[error("Backpressure: {0}")]
    Backpressure(String),
    /// Underlying storage failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Memory store result type
pub type Result<T> = std::result::Result<T, MemoryError>;

// ============================================================================
// STATISTICS
// ============================================================================

/// Snapshot of memory store state and counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStoreStats {
    /// Cached memory items
    pub total_memories: usize,
    /// Item count per memory type
    pub memory_types: BTreeMap<String, usize>,
    /// Distinct pattern signatures indexed
    pub pattern_index_size: usize,
    /// Directed association edges
    pub association_count: usize,
    /// Mean strength across cached items
    pub average_strength: f64,
    /// Retrieval operations served
    pub retrieval_operations: u64,
    /// Storage operations performed
    pub storage_operations: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    retrieval_operations: u64,
    storage_operations: u64,
}

// ============================================================================
// MEMORY STORE
// ============================================================================

struct StoreInner {
    memories: HashMap<String, MemoryItem>,
    pattern_index: HashMap<String, BTreeSet<String>>,
    association_graph: HashMap<String, BTreeMap<String, f64>>,
    counters: StoreCounters,
}

/// Long-term memory store
///
/// Provides pattern-based retrieval, contextual relevance ranking,
/// strength-based activation, association tracking, and time decay.
/// Strength mutations from the learning loop arrive via `update_strength`.
pub struct MemoryStore {
    persistence: Arc<Persistence>,
    cache_max: usize,
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store backed by the given persistence adapter
    pub fn new(persistence: Arc<Persistence>, cache_max: usize) -> Self {
        Self {
            persistence,
            cache_max,
            inner: Mutex::new(StoreInner {
                memories: HashMap::new(),
                pattern_index: HashMap::new(),
                association_graph: HashMap::new(),
                counters: StoreCounters::default(),
            }),
        }
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| MemoryError::InvariantViolated("memory store lock poisoned".to_string()))
    }

    /// Load persisted memories into the cache and rebuild the indices
    pub fn load(&self) -> Result<usize> {
        let persisted = self.persistence.load_all_memories()?;
        let mut inner = self.lock_inner()?;

        inner.memories.clear();
        inner.pattern_index.clear();
        inner.association_graph.clear();

        for item in persisted {
            inner
                .pattern_index
                .entry(item.pattern_signature.clone())
                .or_default()
                .insert(item.id.clone());

            let edges: BTreeMap<String, f64> = item
                .associations
                .iter()
                .map(|other| (other.clone(), REBUILT_EDGE_WEIGHT))
                .collect();
            inner.association_graph.insert(item.id.clone(), edges);

            inner.memories.insert(item.id.clone(), item);
        }

        let loaded = inner.memories.len();
        info!("Memory store loaded {loaded} memories");
        Ok(loaded)
    }

    /// Create a new memory item (not yet stored)
    pub fn create_item(&self, input: NewMemory) -> MemoryItem {
        input.into_item()
    }

    /// Store a memory item: cache insert, index update, persistence write
    pub fn store(&self, item: MemoryItem) -> Result<String> {
        let mut inner = self.lock_inner()?;

        if inner.memories.len() >= self.cache_max && !inner.memories.contains_key(&item.id) {
            return Err(MemoryError::Backpressure(format!(
                "memory cache at capacity ({})",
                self.cache_max
            )));
        }

        let id = item.id.clone();
        inner
            .pattern_index
            .entry(item.pattern_signature.clone())
            .or_default()
            .insert(id.clone());
        inner.association_graph.entry(id.clone()).or_default();

        self.persistence.store_memory(&item)?;
        debug!(
            "Stored memory {id} with pattern {}",
            item.pattern_signature
        );
        inner.memories.insert(id.clone(), item);
        inner.counters.storage_operations += 1;

        Ok(id)
    }

    /// Retrieve memories matching a pattern signature under a context
    ///
    /// Convenience form of `retrieve_by_query` with the retrieval defaults.
    pub fn retrieve(&self, signature: &str, context: &Map<String, Value>) -> Result<Vec<MemoryItem>> {
        self.retrieve_by_query(&MemoryQuery {
            pattern_signature: Some(signature.to_string()),
            context: Some(context.clone()),
            min_strength: 0.1,
            limit: 20,
            ..Default::default()
        })
    }

    /// Retrieve memories by query, recording an access on every result
    ///
    /// Results are ordered by relevance, then strength, then recency, then
    /// id. The access side effects happen inside the same critical section
    /// as the read.
    pub fn retrieve_by_query(&self, query: &MemoryQuery) -> Result<Vec<MemoryItem>> {
        let mut inner = self.lock_inner()?;
        inner.counters.retrieval_operations += 1;

        let selected = select_ids(&inner, query);
        let mut result = Vec::with_capacity(selected.len());

        for id in selected {
            let item = inner
                .memories
                .get_mut(&id)
                .ok_or_else(|| MemoryError::InvariantViolated(format!("indexed id {id} missing")))?;
            item.access();
            self.persistence.store_memory(item)?;

            let mut snapshot = item.clone();
            if !query.include_associations {
                snapshot.associations.clear();
            }
            result.push(snapshot);
        }

        debug!("Retrieved {} memories for query", result.len());
        Ok(result)
    }

    /// Retrieve memories by query without mutating them
    ///
    /// Same selection and ordering as `retrieve_by_query`, but no access
    /// bookkeeping and no persistence writes.
    pub fn peek_by_query(&self, query: &MemoryQuery) -> Result<Vec<MemoryItem>> {
        let inner = self.lock_inner()?;
        let selected = select_ids(&inner, query);

        Ok(selected
            .into_iter()
            .filter_map(|id| inner.memories.get(&id))
            .map(|item| {
                let mut snapshot = item.clone();
                if !query.include_associations {
                    snapshot.associations.clear();
                }
                snapshot
            })
            .collect())
    }

    /// Fetch a memory snapshot by id without recording an access
    pub fn get(&self, memory_id: &str) -> Result<MemoryItem> {
        let inner = self.lock_inner()?;
        inner
            .memories
            .get(memory_id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(memory_id.to_string()))
    }

    /// Apply a strength delta, returning the new clamped strength
    pub fn update_strength(&self, memory_id: &str, delta: f64) -> Result<f64> {
        let mut inner = self.lock_inner()?;
        let item = inner
            .memories
            .get_mut(memory_id)
            .ok_or_else(|| MemoryError::NotFound(memory_id.to_string()))?;

        let old_strength = item.strength;
        item.strength = (item.strength + delta).clamp(0.0, 1.0);
        let new_strength = item.strength;
        self.persistence.store_memory(item)?;

        debug!("Updated memory {memory_id} strength: {old_strength} -> {new_strength}");
        Ok(new_strength)
    }

    /// Create a symmetric association between two memories
    pub fn create_association(&self, id1: &str, id2: &str, strength: f64) -> Result<()> {
        if id1 == id2 {
            return Err(MemoryError::InvariantViolated(
                "cannot associate a memory with itself".to_string(),
            ));
        }

        let mut inner = self.lock_inner()?;
        if !inner.memories.contains_key(id1) {
            return Err(MemoryError::NotFound(id1.to_string()));
        }
        if !inner.memories.contains_key(id2) {
            return Err(MemoryError::NotFound(id2.to_string()));
        }

        let weight = strength.clamp(0.0, 1.0);
        inner
            .association_graph
            .entry(id1.to_string())
            .or_default()
            .insert(id2.to_string(), weight);
        inner
            .association_graph
            .entry(id2.to_string())
            .or_default()
            .insert(id1.to_string(), weight);

        for (a, b) in [(id1, id2), (id2, id1)] {
            let item = inner
                .memories
                .get_mut(a)
                .ok_or_else(|| MemoryError::NotFound(a.to_string()))?;
            item.associations.insert(b.to_string());
            self.persistence.store_memory(item)?;
        }

        debug!("Created association between {id1} and {id2}");
        Ok(())
    }

    /// Memories directly associated with the given memory
    ///
    /// Ordered by association weight descending.
    pub fn get_associated(&self, memory_id: &str) -> Result<Vec<MemoryItem>> {
        let inner = self.lock_inner()?;
        if !inner.memories.contains_key(memory_id) {
            return Err(MemoryError::NotFound(memory_id.to_string()));
        }

        let mut neighbors: Vec<(String, f64)> = inner
            .association_graph
            .get(memory_id)
            .map(|edges| edges.iter().map(|(id, w)| (id.clone(), *w)).collect())
            .unwrap_or_default();
        neighbors.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(neighbors
            .into_iter()
            .filter_map(|(id, _)| inner.memories.get(&id).cloned())
            .collect())
    }

    /// Apply time decay to every cached memory
    ///
    /// Persists only items whose strength actually changed. Returns the
    /// number of decayed memories.
    pub fn apply_time_decay(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.lock_inner()?;
        let mut decayed = 0usize;

        let ids: Vec<String> = inner.memories.keys().cloned().collect();
        for id in ids {
            let item = inner
                .memories
                .get_mut(&id)
                .ok_or_else(|| MemoryError::InvariantViolated(format!("cached id {id} missing")))?;

            let days_passed = (now - item.last_accessed).num_days();
            if days_passed <= 0 {
                continue;
            }

            let old_strength = item.strength;
            item.decay(days_passed as f64);
            if item.strength != old_strength {
                self.persistence.store_memory(item)?;
                decayed += 1;
            }
        }

        if decayed > 0 {
            info!("Applied decay to {decayed} memories");
        }
        Ok(decayed)
    }

    /// Delete a memory: cache, index, every neighbor edge, persisted row
    pub fn delete(&self, memory_id: &str) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let item = inner
            .memories
            .remove(memory_id)
            .ok_or_else(|| MemoryError::NotFound(memory_id.to_string()))?;

        if let Some(ids) = inner.pattern_index.get_mut(&item.pattern_signature) {
            ids.remove(memory_id);
            if ids.is_empty() {
                inner.pattern_index.remove(&item.pattern_signature);
            }
        }

        let neighbors: Vec<String> = inner
            .association_graph
            .remove(memory_id)
            .map(|edges| edges.into_keys().collect())
            .unwrap_or_default();
        for neighbor_id in neighbors {
            if let Some(edges) = inner.association_graph.get_mut(&neighbor_id) {
                edges.remove(memory_id);
            }
            if let Some(neighbor) = inner.memories.get_mut(&neighbor_id) {
                neighbor.associations.remove(memory_id);
                self.persistence.store_memory(neighbor)?;
            }
        }

        self.persistence.delete_memory(memory_id)?;
        debug!("Deleted memory {memory_id}");
        Ok(())
    }

    /// Remove memories decayed below `epsilon` and stale for `min_age_days`
    pub fn prune(&self, epsilon: f64, min_age_days: i64) -> Result<usize> {
        let now = Utc::now();
        let stale: Vec<String> = {
            let inner = self.lock_inner()?;
            inner
                .memories
                .values()
                .filter(|item| {
                    item.strength < epsilon
                        && (now - item.last_accessed).num_days() > min_age_days
                })
                .map(|item| item.id.clone())
                .collect()
        };

        for id in &stale {
            self.delete(id)?;
        }

        if !stale.is_empty() {
            info!("Pruned {} decayed memories", stale.len());
        }
        Ok(stale.len())
    }

    /// Check the store invariants, failing with the first violation found
    pub fn verify_invariants(&self) -> Result<()> {
        let inner = self.lock_inner()?;

        for (id, item) in &inner.memories {
            if !(0.0..=1.0).contains(&item.strength) {
                return Err(MemoryError::InvariantViolated(format!(
                    "memory {id} strength {} out of range",
                    item.strength
                )));
            }
            if !(0.0..=1.0).contains(&item.confidence) {
                return Err(MemoryError::InvariantViolated(format!(
                    "memory {id} confidence {} out of range",
                    item.confidence
                )));
            }

            let indexed = inner
                .pattern_index
                .get(&item.pattern_signature)
                .is_some_and(|ids| ids.contains(id));
            if !indexed {
                return Err(MemoryError::InvariantViolated(format!(
                    "memory {id} missing from pattern index"
                )));
            }

            for other_id in &item.associations {
                let reciprocal = inner
                    .memories
                    .get(other_id)
                    .is_some_and(|other| other.associations.contains(id));
                if !reciprocal {
                    return Err(MemoryError::InvariantViolated(format!(
                        "association {id} -> {other_id} is not symmetric"
                    )));
                }
            }
        }

        for (signature, ids) in &inner.pattern_index {
            for id in ids {
                let consistent = inner
                    .memories
                    .get(id)
                    .is_some_and(|item| &item.pattern_signature == signature);
                if !consistent {
                    return Err(MemoryError::InvariantViolated(format!(
                        "pattern index entry {signature} -> {id} is stale"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Snapshot of store state and counters
    pub fn statistics(&self) -> MemoryStoreStats {
        let inner = match self.lock_inner() {
            Ok(inner) => inner,
            Err(_) => {
                return MemoryStoreStats {
                    total_memories: 0,
                    memory_types: BTreeMap::new(),
                    pattern_index_size: 0,
                    association_count: 0,
                    average_strength: 0.0,
                    retrieval_operations: 0,
                    storage_operations: 0,
                }
            }
        };

        let mut memory_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut strength_sum = 0.0;
        for item in inner.memories.values() {
            *memory_types
                .entry(item.memory_type.as_str().to_string())
                .or_default() += 1;
            strength_sum += item.strength;
        }

        let total = inner.memories.len();
        MemoryStoreStats {
            total_memories: total,
            memory_types,
            pattern_index_size: inner.pattern_index.len(),
            association_count: inner
                .association_graph
                .values()
                .map(|edges| edges.len())
                .sum(),
            average_strength: if total > 0 {
                strength_sum / total as f64
            } else {
                0.0
            },
            retrieval_operations: inner.counters.retrieval_operations,
            storage_operations: inner.counters.storage_operations,
        }
    }
}

// ============================================================================
// SELECTION & RELEVANCE
// ============================================================================

/// Select matching ids in final order, applying filters, ranking, and limit
fn select_ids(inner: &StoreInner, query: &MemoryQuery) -> Vec<String> {
    let candidates: Vec<&MemoryItem> = match &query.pattern_signature {
        Some(signature) => inner
            .pattern_index
            .get(signature)
            .map(|ids| ids.iter().filter_map(|id| inner.memories.get(id)).collect())
            .unwrap_or_default(),
        None => inner.memories.values().collect(),
    };

    let mut ranked: Vec<(&MemoryItem, f64)> = candidates
        .into_iter()
        .filter(|item| item.strength >= query.min_strength)
        .filter(|item| {
            query
                .memory_type
                .is_none_or(|memory_type| item.memory_type == memory_type)
        })
        .filter(|item| {
            query.tags.as_ref().is_none_or(|tags| {
                tags.is_empty() || tags.iter().any(|tag| item.tags.contains(tag))
            })
        })
        .filter_map(|item| {
            let relevance = calculate_relevance(item, query);
            (relevance > 0.0).then_some((item, relevance))
        })
        .collect();

    ranked.sort_by(|(a, relevance_a), (b, relevance_b)| {
        relevance_b
            .total_cmp(relevance_a)
            .then(b.strength.total_cmp(&a.strength))
            .then(b.last_accessed.cmp(&a.last_accessed))
            .then(a.id.cmp(&b.id))
    });

    ranked
        .into_iter()
        .take(query.limit)
        .map(|(item, _)| item.id.clone())
        .collect()
}

/// Relevance score between a memory and a query, clamped to [0, 1]
///
/// Signature equality 0.4, context overlap x0.3, tag overlap x0.2, memory
/// type match 0.1.
fn calculate_relevance(item: &MemoryItem, query: &MemoryQuery) -> f64 {
    let mut relevance = 0.0;

    if query.pattern_signature.as_deref() == Some(item.pattern_signature.as_str()) {
        relevance += 0.4;
    }

    if let Some(query_context) = &query.context {
        relevance += context_overlap(item.context.as_object(), query_context) * 0.3;
    }

    if let Some(tags) = &query.tags {
        if !tags.is_empty() {
            let overlap = tags.iter().filter(|tag| item.tags.contains(*tag)).count();
            relevance += (overlap as f64 / tags.len() as f64) * 0.2;
        }
    }

    if query.memory_type == Some(item.memory_type) {
        relevance += 0.1;
    }

    relevance.min(1.0)
}

/// Fraction of shared context keys whose values are equal
fn context_overlap(
    memory_context: Option<&Map<String, Value>>,
    query_context: &Map<String, Value>,
) -> f64 {
    let Some(memory_context) = memory_context else {
        return 0.0;
    };
    if memory_context.is_empty() || query_context.is_empty() {
        return 0.0;
    }

    let mut common = 0usize;
    let mut matches = 0usize;
    for (key, value) in query_context {
        if let Some(memory_value) = memory_context.get(key) {
            common += 1;
            if memory_value == value {
                matches += 1;
            }
        }
    }

    if common == 0 {
        0.0
    } else {
        matches as f64 / common as f64
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;
    use serde_json::json;

    fn store() -> MemoryStore {
        let persistence = Arc::new(Persistence::open_ephemeral().unwrap());
        MemoryStore::new(persistence, 1_000_000)
    }

    fn new_memory(signature: &str) -> NewMemory {
        NewMemory {
            pattern_signature: signature.to_string(),
            content: json!({"raw": {}}),
            context: json!({"state": "normal", "intensity": "medium"}),
            ..Default::default()
        }
    }

    fn stored(store: &MemoryStore, signature: &str) -> String {
        let item = store.create_item(new_memory(signature));
        store.store(item).unwrap()
    }

    #[test]
    fn test_store_and_retrieve_roundtrip() {
        let store = store();
        let id = stored(&store, "error:validation_error");

        let context = json!({"state": "normal"})
            .as_object()
            .cloned()
            .unwrap();
        let results = store.retrieve("error:validation_error", &context).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        // access happened inside the retrieve critical section
        assert_eq!(results[0].access_count, 1);
        assert!((results[0].strength - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_retrieve_increments_access_monotonically() {
        let store = store();
        stored(&store, "error:x");
        let context = Map::new();

        let first = store.retrieve("error:x", &context).unwrap();
        let second = store.retrieve("error:x", &context).unwrap();
        assert!(second[0].access_count > first[0].access_count);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let store = store();
        stored(&store, "error:x");

        let query = MemoryQuery {
            pattern_signature: Some("error:x".to_string()),
            ..Default::default()
        };
        let peeked = store.peek_by_query(&query).unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].access_count, 0);

        let retrieved = store.retrieve_by_query(&query).unwrap();
        assert_eq!(retrieved[0].access_count, 1);
    }

    #[test]
    fn test_min_strength_filter() {
        let store = store();
        let mut weak = store.create_item(new_memory("sig:a"));
        weak.strength = 0.05;
        store.store(weak).unwrap();

        let query = MemoryQuery {
            pattern_signature: Some("sig:a".to_string()),
            min_strength: 0.1,
            ..Default::default()
        };
        assert!(store.retrieve_by_query(&query).unwrap().is_empty());
    }

    #[test]
    fn test_ordering_by_relevance_then_strength() {
        let store = store();

        let mut strong = store.create_item(new_memory("sig:a"));
        strong.strength = 0.9;
        let strong_id = strong.id.clone();
        store.store(strong).unwrap();

        let mut weak = store.create_item(new_memory("sig:a"));
        weak.strength = 0.3;
        let weak_id = weak.id.clone();
        store.store(weak).unwrap();

        let query = MemoryQuery {
            pattern_signature: Some("sig:a".to_string()),
            ..Default::default()
        };
        let results = store.retrieve_by_query(&query).unwrap();
        assert_eq!(results[0].id, strong_id);
        assert_eq!(results[1].id, weak_id);
    }

    #[test]
    fn test_tag_and_type_relevance() {
        let store = store();
        let mut tagged = new_memory("sig:t");
        tagged.tags = vec!["api".to_string()];
        tagged.memory_type = MemoryType::Semantic;
        let item = store.create_item(tagged);
        let id = item.id.clone();
        store.store(item).unwrap();

        let query = MemoryQuery {
            pattern_signature: Some("sig:t".to_string()),
            memory_type: Some(MemoryType::Semantic),
            tags: Some(vec!["api".to_string()]),
            ..Default::default()
        };
        let results = store.retrieve_by_query(&query).unwrap();
        assert_eq!(results[0].id, id);

        // tag filter rejects non-overlapping items
        let miss = MemoryQuery {
            pattern_signature: Some("sig:t".to_string()),
            tags: Some(vec!["absent".to_string()]),
            ..Default::default()
        };
        assert!(store.retrieve_by_query(&miss).unwrap().is_empty());
    }

    #[test]
    fn test_context_overlap_scoring() {
        let matching = json!({"state": "error", "intensity": "high"});
        let query_context = json!({"state": "error", "intensity": "low"})
            .as_object()
            .cloned()
            .unwrap();
        // one of two shared keys matches
        assert_eq!(context_overlap(matching.as_object(), &query_context), 0.5);
    }

    #[test]
    fn test_update_strength_clamps_and_persists() {
        let store = store();
        let id = stored(&store, "sig:s");

        let strength = store.update_strength(&id, 0.9).unwrap();
        assert_eq!(strength, 1.0);
        let strength = store.update_strength(&id, -5.0).unwrap();
        assert_eq!(strength, 0.0);

        assert!(matches!(
            store.update_strength("missing", 0.1),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_association_symmetry() {
        let store = store();
        let a = stored(&store, "sig:a");
        let b = stored(&store, "sig:b");

        store.create_association(&a, &b, 0.8).unwrap();

        assert!(store.get(&b).unwrap().associations.contains(&a));
        assert!(store.get(&a).unwrap().associations.contains(&b));

        let associated = store.get_associated(&a).unwrap();
        assert_eq!(associated.len(), 1);
        assert_eq!(associated[0].id, b);

        store.verify_invariants().unwrap();
    }

    #[test]
    fn test_association_errors() {
        let store = store();
        let a = stored(&store, "sig:a");

        assert!(matches!(
            store.create_association(&a, "missing", 0.5),
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.create_association(&a, &a, 0.5),
            Err(MemoryError::InvariantViolated(_))
        ));
        assert!(matches!(
            store.get_associated("missing"),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_cleans_neighbors_and_index() {
        let store = store();
        let a = stored(&store, "sig:a");
        let b = stored(&store, "sig:b");
        store.create_association(&a, &b, 0.5).unwrap();

        store.delete(&a).unwrap();

        assert!(matches!(store.get(&a), Err(MemoryError::NotFound(_))));
        assert!(!store.get(&b).unwrap().associations.contains(&a));
        store.verify_invariants().unwrap();

        let query = MemoryQuery {
            pattern_signature: Some("sig:a".to_string()),
            ..Default::default()
        };
        assert!(store.retrieve_by_query(&query).unwrap().is_empty());
    }

    #[test]
    fn test_backpressure_at_capacity() {
        let persistence = Arc::new(Persistence::open_ephemeral().unwrap());
        let store = MemoryStore::new(persistence, 1);
        stored(&store, "sig:a");

        let overflow = store.create_item(new_memory("sig:b"));
        assert!(matches!(
            store.store(overflow),
            Err(MemoryError::Backpressure(_))
        ));
    }

    #[test]
    fn test_apply_time_decay_skips_fresh_items() {
        let store = store();
        stored(&store, "sig:a");
        // freshly accessed, zero whole days elapsed
        assert_eq!(store.apply_time_decay().unwrap(), 0);
    }

    #[test]
    fn test_load_rebuilds_indices() {
        let persistence = Arc::new(Persistence::open_ephemeral().unwrap());
        let store = MemoryStore::new(Arc::clone(&persistence), 1_000_000);
        let a = stored(&store, "sig:a");
        let b = stored(&store, "sig:b");
        store.create_association(&a, &b, 0.7).unwrap();

        let reloaded = MemoryStore::new(persistence, 1_000_000);
        assert_eq!(reloaded.load().unwrap(), 2);
        reloaded.verify_invariants().unwrap();

        let associated = reloaded.get_associated(&a).unwrap();
        assert_eq!(associated[0].id, b);
    }

    #[test]
    fn test_statistics() {
        let store = store();
        stored(&store, "sig:a");
        stored(&store, "sig:a");
        stored(&store, "sig:b");

        let stats = store.statistics();
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.pattern_index_size, 2);
        assert_eq!(stats.storage_operations, 3);
        assert!((stats.average_strength - 0.5).abs() < 1e-9);
    }
}
