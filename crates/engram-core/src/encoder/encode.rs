//! Pattern & event encoder
//!
//! Deterministically maps a raw event to `(Pattern, Context)`. The encoder
//! never fails: any internal error yields a well-formed fallback encoding
//! with the error captured in `metadata.encoding_error`.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::event::{
    Context, ContextState, EncodedEvent, EventType, IntensityLevel, Pattern, RawEvent,
    RawEventSummary,
};

/// Metadata fields the encoder recognizes and forwards into `Context`
const RECOGNIZED_METADATA_KEYS: &[&str] =
    &["user_id", "session_id", "version", "environment", "tags"];

/// Keys whose presence raises structural confidence
const EXPECTED_KEYS: &[&str] = &["timestamp", "source", "type"];

/// Payloads above this serialized size are treated as potential noise
const NOISE_SIZE_BYTES: usize = 10_000;

// ============================================================================
// PATTERN REGISTRY
// ============================================================================

/// Registry entry tracking one observed pattern signature
#[derive(Debug, Clone)]
struct RegisteredPattern {
    event_type: EventType,
    confidence: f64,
}

/// Statistics about registered patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternStats {
    /// Distinct signatures currently registered
    pub total_patterns: usize,
    /// Signature count per event type
    pub pattern_types: BTreeMap<String, usize>,
    /// Mean confidence across registered patterns
    pub avg_confidence: f64,
}

// ============================================================================
// ENCODER
// ============================================================================

/// Pattern & event encoder
///
/// Pure with respect to its output; the only state is a bounded registry of
/// observed signatures kept for statistics. Entries are inserted and never
/// promoted, so LRU eviction degenerates to FIFO at the capacity bound.
pub struct Encoder {
    registry: Mutex<LruCache<String, RegisteredPattern>>,
}

impl Encoder {
    /// Create an encoder with the given registry capacity
    pub fn new(registry_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(registry_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Encode a raw event into pattern and context
    ///
    /// Never returns an error: encoding failures produce a fallback encoding
    /// with `type = unknown`, confidence 0.1, and state ERROR.
    pub fn encode(&self, event: &RawEvent) -> EncodedEvent {
        match self.try_encode(event) {
            Ok(encoded) => {
                self.register(&encoded.pattern);
                encoded
            }
            Err(error) => {
                warn!("Encoding failed, emitting fallback: {error}");
                self.fallback_encoding(event, &error)
            }
        }
    }

    fn try_encode(&self, event: &RawEvent) -> Result<EncodedEvent, String> {
        let serialized =
            serde_json::to_string(&Value::Object(event.fields.clone())).map_err(|e| e.to_string())?;

        let event_type = detect_event_type(event);
        let features = extract_features(event, event_type, serialized.len());
        let pattern = Pattern {
            event_type,
            signature: generate_signature(event, event_type),
            confidence: calculate_confidence(event, &features, serialized.len()),
            features,
            timestamp: Utc::now(),
        };

        let context = Context {
            state: detect_state(event, event_type),
            intensity: detect_intensity(event, event_type),
            source: event
                .get_str("source")
                .unwrap_or("unknown")
                .to_string(),
            metadata: extract_metadata(event),
        };

        debug!(
            signature = %pattern.signature,
            confidence = pattern.confidence,
            "encoded event"
        );

        Ok(EncodedEvent {
            pattern,
            context,
            encoded_at: Utc::now(),
            summary: summarize(event, serialized.len()),
        })
    }

    /// Fallback encoding when normal encoding fails
    fn fallback_encoding(&self, event: &RawEvent, error: &str) -> EncodedEvent {
        let hash = stable_hash(event);
        let mut metadata = Map::new();
        metadata.insert("encoding_error".to_string(), Value::from(error));

        EncodedEvent {
            pattern: Pattern {
                event_type: EventType::Unknown,
                signature: format!("unknown:{hash}"),
                features: vec!["fallback".to_string()],
                confidence: 0.1,
                timestamp: Utc::now(),
            },
            context: Context {
                state: ContextState::Error,
                intensity: IntensityLevel::Medium,
                source: "fallback".to_string(),
                metadata,
            },
            encoded_at: Utc::now(),
            summary: summarize(event, 0),
        }
    }

    fn register(&self, pattern: &Pattern) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.put(
                pattern.signature.clone(),
                RegisteredPattern {
                    event_type: pattern.event_type,
                    confidence: pattern.confidence,
                },
            );
        }
    }

    /// Statistics over the bounded pattern registry
    pub fn pattern_stats(&self) -> PatternStats {
        let registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(_) => {
                return PatternStats {
                    total_patterns: 0,
                    pattern_types: BTreeMap::new(),
                    avg_confidence: 0.0,
                }
            }
        };

        let mut pattern_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut confidence_sum = 0.0;
        for (_, entry) in registry.iter() {
            *pattern_types
                .entry(entry.event_type.as_str().to_string())
                .or_default() += 1;
            confidence_sum += entry.confidence;
        }

        let total_patterns = registry.len();
        PatternStats {
            total_patterns,
            pattern_types,
            avg_confidence: if total_patterns > 0 {
                confidence_sum / total_patterns as f64
            } else {
                0.0
            },
        }
    }
}

// ============================================================================
// DECISION RULES
// ============================================================================

/// Detect the event type from field presence, first match wins
fn detect_event_type(event: &RawEvent) -> EventType {
    if event.has("error") || event.has("exception") {
        EventType::Error
    } else if event.has("request") || event.has("api_call") {
        EventType::Request
    } else if event.has("response") || event.has("result") {
        EventType::Response
    } else if event.has("feedback") || event.has("rating") {
        EventType::Feedback
    } else if event.has("learning") || event.has("training") {
        EventType::Learning
    } else if event.has("reasoning") || event.has("analysis") {
        EventType::Reasoning
    } else if event.has("user") || event.has("action") {
        EventType::UserAction
    } else if event.has("memory") || event.has("retrieval") {
        EventType::MemoryAccess
    } else {
        EventType::DataInput
    }
}

/// Generate the `"<type>:<discriminator>"` signature
fn generate_signature(event: &RawEvent, event_type: EventType) -> String {
    match event_type {
        EventType::Error => {
            let error_type = event.get_str("error_type").unwrap_or("unknown");
            format!("error:{error_type}")
        }
        EventType::Request => {
            let method = event.get_str("method").unwrap_or("unknown");
            let endpoint = event.get_str("endpoint").unwrap_or("unknown");
            format!("request:{method}:{endpoint}")
        }
        EventType::Response => {
            let status = event
                .fields
                .get("status_code")
                .map(value_to_compact_string)
                .unwrap_or_else(|| "unknown".to_string());
            format!("response:status:{status}")
        }
        EventType::UserAction => {
            let action = event.get_str("action").unwrap_or("unknown");
            format!("action:{action}")
        }
        _ => format!("{}:{}", event_type.as_str(), stable_hash(event)),
    }
}

/// Extract feature tags: presence, type-specific, and size bucket
fn extract_features(event: &RawEvent, event_type: EventType, serialized_len: usize) -> Vec<String> {
    let mut features = Vec::new();

    if event.has("timestamp") {
        features.push("has_timestamp".to_string());
    }
    if event.has("metadata") {
        features.push("has_metadata".to_string());
    }

    match event_type {
        EventType::Error => {
            if let Some(error_type) = event.get_str("error_type") {
                features.push(format!("error_type_{error_type}"));
            }
            if event.has("stack_trace") {
                features.push("has_stack_trace".to_string());
            }
        }
        EventType::Request => {
            features.push(format!(
                "method_{}",
                event.get_str("method").unwrap_or("unknown")
            ));
            if event.has("headers") {
                features.push("has_headers".to_string());
            }
        }
        EventType::Response => {
            let status = event
                .fields
                .get("status_code")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if status >= 500 {
                features.push("server_error".to_string());
            } else if status >= 400 {
                features.push("client_error".to_string());
            } else {
                features.push("success".to_string());
            }
        }
        _ => {}
    }

    if serialized_len < 100 {
        features.push("small".to_string());
    } else if serialized_len < 1000 {
        features.push("medium".to_string());
    } else {
        features.push("large".to_string());
    }

    features
}

/// Confidence: base 0.5, feature richness, expected structure, noise penalty
fn calculate_confidence(event: &RawEvent, features: &[String], serialized_len: usize) -> f64 {
    let feature_bonus = 0.1 * (features.len().min(3) as f64);
    let structure_bonus = 0.1
        * EXPECTED_KEYS
            .iter()
            .filter(|key| event.has(key))
            .count() as f64;
    let size_penalty = if serialized_len > NOISE_SIZE_BYTES { 0.2 } else { 0.0 };

    (0.5 + feature_bonus + structure_bonus - size_penalty).clamp(0.0, 1.0)
}

/// Detect the contextual system state
fn detect_state(event: &RawEvent, event_type: EventType) -> ContextState {
    if event_type == EventType::Error {
        return ContextState::Error;
    }
    if event
        .get_str("status")
        .is_some_and(|status| status.to_lowercase().contains("processing"))
    {
        return ContextState::Processing;
    }
    if event.has("learning") {
        return ContextState::Learning;
    }
    if event.get_str("activity_level") == Some("high") {
        return ContextState::HighActivity;
    }
    ContextState::Normal
}

/// Detect the event intensity
fn detect_intensity(event: &RawEvent, event_type: EventType) -> IntensityLevel {
    if event_type == EventType::Error {
        return IntensityLevel::High;
    }
    match event.get_str("priority").map(str::to_lowercase).as_deref() {
        Some("high") => IntensityLevel::High,
        Some("critical") => IntensityLevel::Critical,
        Some("low") => IntensityLevel::Low,
        _ => IntensityLevel::Medium,
    }
}

/// Copy the recognized metadata fields into the context
fn extract_metadata(event: &RawEvent) -> Map<String, Value> {
    let mut metadata = Map::new();
    for key in RECOGNIZED_METADATA_KEYS {
        if let Some(value) = event.fields.get(*key) {
            metadata.insert((*key).to_string(), value.clone());
        }
    }
    metadata
}

fn summarize(event: &RawEvent, serialized_len: usize) -> RawEventSummary {
    RawEventSummary {
        keys: event.fields.keys().cloned().collect(),
        size: serialized_len,
        types: event
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), json_type_name(value).to_string()))
            .collect(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_compact_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Order-independent content hash of an event
pub fn stable_hash(event: &RawEvent) -> u64 {
    let mut keys: Vec<&String> = event.fields.keys().collect();
    keys.sort();

    let mut hasher = DefaultHasher::new();
    event.kind.hash(&mut hasher);
    for key in keys {
        key.hash(&mut hasher);
        if let Some(value) = event.fields.get(key) {
            value.to_string().hash(&mut hasher);
        }
    }
    hasher.finish()
}

// ============================================================================
// TESTS
// ============================================================================
