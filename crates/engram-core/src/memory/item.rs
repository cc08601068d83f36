//! Memory item - the primary persisted entity
//!
//! A memory item couples an opaque content payload with the pattern
//! signature that produced it, a context snapshot, and the adaptive state
//! the learning loop mutates: strength, access bookkeeping, associations.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default strength decay per day
pub const DEFAULT_DECAY_RATE: f64 = 0.001;

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Types of memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Specific experiences/events
    #[default]
    Episodic,
    /// General knowledge
    Semantic,
    /// How-to knowledge
    Procedural,
    /// Temporary working memory
    Working,
    /// Linked memories
    Associative,
}

impl MemoryType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Procedural => "procedural",
            MemoryType::Working => "working",
            MemoryType::Associative => "associative",
        }
    }

    /// Parse from string name, defaulting to Episodic
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "semantic" => MemoryType::Semantic,
            "procedural" => MemoryType::Procedural,
            "working" => MemoryType::Working,
            "associative" => MemoryType::Associative,
            _ => MemoryType::Episodic,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY ITEM
// ============================================================================

/// A single memory item
///
/// Mutated only through `access`, strength updates, and association
/// creation; `content`, `context`, and `created_at` are immutable after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Signature of the pattern that produced this memory
    pub pattern_signature: String,
    /// Memory classification
    pub memory_type: MemoryType,
    /// Opaque structured payload
    pub content: Value,
    /// Context snapshot at creation time
    pub context: Value,
    /// Memory strength (0.0 to 1.0)
    pub strength: f64,
    /// Number of recorded accesses
    pub access_count: u64,
    /// When the memory was last accessed
    pub last_accessed: DateTime<Utc>,
    /// When the memory was created (immutable)
    pub created_at: DateTime<Utc>,
    /// Ids of associated memories (symmetric)
    pub associations: BTreeSet<String>,
    /// Categorization tags
    pub tags: BTreeSet<String>,
    /// Confidence in the memory (0.0 to 1.0)
    pub confidence: f64,
    /// Strength decay per day
    pub decay_rate: f64,
}

impl MemoryItem {
    /// Record an access: bump the counter, refresh recency, nudge strength
    pub fn access(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
        self.strength = (self.strength + 0.01).min(1.0);
    }

    /// Apply time-based decay for the given number of days
    pub fn decay(&mut self, days: f64) {
        if days <= 0.0 {
            return;
        }
        self.strength = (self.strength - self.decay_rate * days).max(0.0);
    }

    /// Days since the memory was last accessed, relative to `now`
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed).num_seconds() as f64 / 86_400.0
    }
}

// ============================================================================
// INPUT & QUERY TYPES
// ============================================================================

/// Input for creating a new memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    /// Pattern signature the memory indexes under
    pub pattern_signature: String,
    /// Opaque structured payload
    pub content: Value,
    /// Context snapshot
    pub context: Value,
    /// Memory classification
    #[serde(default)]
    pub memory_type: MemoryType,
    /// Categorization tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Initial strength
    #[serde(default = "default_half")]
    pub strength: f64,
    /// Initial confidence
    #[serde(default = "default_half")]
    pub confidence: f64,
}

fn default_half() -> f64 {
    0.5
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            pattern_signature: String::new(),
            content: Value::Object(Map::new()),
            context: Value::Object(Map::new()),
            memory_type: MemoryType::Episodic,
            tags: vec![],
            strength: 0.5,
            confidence: 0.5,
        }
    }
}

impl NewMemory {
    /// Build the memory item with a fresh id and clamped bounds
    pub fn into_item(self) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: Uuid::new_v4().to_string(),
            pattern_signature: self.pattern_signature,
            memory_type: self.memory_type,
            content: self.content,
            context: self.context,
            strength: self.strength.clamp(0.0, 1.0),
            access_count: 0,
            last_accessed: now,
            created_at: now,
            associations: BTreeSet::new(),
            tags: self.tags.into_iter().collect(),
            confidence: self.confidence.clamp(0.0, 1.0),
            decay_rate: DEFAULT_DECAY_RATE,
        }
    }
}

/// Query for memory retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryQuery {
    /// Match this pattern signature
    pub pattern_signature: Option<String>,
    /// Match this memory type
    pub memory_type: Option<MemoryType>,
    /// Context to score overlap against
    pub context: Option<Map<String, Value>>,
    /// Minimum strength to consider
    pub min_strength: f64,
    /// Require overlap with any of these tags
    pub tags: Option<Vec<String>>,
    /// Maximum number of results
    pub limit: usize,
    /// Whether returned items carry their association ids
    pub include_associations: bool,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            pattern_signature: None,
            memory_type: None,
            context: None,
            min_strength: 0.1,
            tags: None,
            limit: 10,
            include_associations: true,
        }
    }
}
