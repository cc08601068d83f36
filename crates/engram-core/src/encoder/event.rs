//! Event and pattern types
//!
//! A raw event is a normalized record: an optional kind hint plus a flat
//! field map. The encoder turns it into a `Pattern` (what happened) and a
//! `Context` (under which circumstances), both deterministic functions of
//! the input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// RAW EVENT
// ============================================================================

/// Normalized input record for the encoder
///
/// Replaces duck-typed event dicts: all decision rules pattern-match on
/// `fields` instead of probing arbitrary attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Optional caller-supplied kind hint
    pub kind: Option<String>,
    /// Flat event payload
    pub fields: Map<String, Value>,
}

impl RawEvent {
    /// Create an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder-style kind hint
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Whether a field is present
    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field value as a string slice, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { kind: None, fields },
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                Self { kind: None, fields }
            }
        }
    }
}

/// Summary of a raw event, carried for logging and debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventSummary {
    /// Field names in insertion order
    pub keys: Vec<String>,
    /// Serialized payload size in bytes
    pub size: usize,
    /// JSON type name per field
    pub types: BTreeMap<String, String>,
}

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Types of events that can be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Request,
    Response,
    Error,
    Learning,
    MemoryAccess,
    Reasoning,
    Feedback,
    System,
    UserAction,
    #[default]
    DataInput,
    /// Produced only by the fallback encoding path
    Unknown,
}

impl EventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "request",
            EventType::Response => "response",
            EventType::Error => "error",
            EventType::Learning => "learning",
            EventType::MemoryAccess => "memory_access",
            EventType::Reasoning => "reasoning",
            EventType::Feedback => "feedback",
            EventType::System => "system",
            EventType::UserAction => "user_action",
            EventType::DataInput => "data_input",
            EventType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONTEXT STATE & INTENSITY
// ============================================================================

/// Contextual system states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    #[default]
    Normal,
    Error,
    Learning,
    HighActivity,
    LowActivity,
    Processing,
    Idle,
}

impl ContextState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextState::Normal => "normal",
            ContextState::Error => "error",
            ContextState::Learning => "learning",
            ContextState::HighActivity => "high_activity",
            ContextState::LowActivity => "low_activity",
            ContextState::Processing => "processing",
            ContextState::Idle => "idle",
        }
    }

    /// Parse from string name, defaulting to Normal
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => ContextState::Error,
            "learning" => ContextState::Learning,
            "high_activity" => ContextState::HighActivity,
            "low_activity" => ContextState::LowActivity,
            "processing" => ContextState::Processing,
            "idle" => ContextState::Idle,
            _ => ContextState::Normal,
        }
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event intensity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntensityLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl IntensityLevel {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IntensityLevel::Low => "low",
            IntensityLevel::Medium => "medium",
            IntensityLevel::High => "high",
            IntensityLevel::Critical => "critical",
        }
    }

    /// Parse from string name, defaulting to Medium
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => IntensityLevel::Low,
            "high" => IntensityLevel::High,
            "critical" => IntensityLevel::Critical,
            _ => IntensityLevel::Medium,
        }
    }

    /// Numeric activation weight: LOW 0.5, MEDIUM 1.0, HIGH 1.5, CRITICAL 2.0
    pub fn weight(&self) -> f64 {
        match self {
            IntensityLevel::Low => 0.5,
            IntensityLevel::Medium => 1.0,
            IntensityLevel::High => 1.5,
            IntensityLevel::Critical => 2.0,
        }
    }
}

impl std::fmt::Display for IntensityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PATTERN & CONTEXT
// ============================================================================

/// A recognized pattern: type tag, discriminating signature, feature tags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// Detected event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Stable `"<type>:<discriminator>"` key used to index memories
    pub signature: String,
    /// Short tags derived deterministically from the event
    pub features: Vec<String>,
    /// Detection confidence (0.0 to 1.0)
    pub confidence: f64,
    /// When the pattern was produced
    pub timestamp: DateTime<Utc>,
}

/// Contextual information produced alongside a pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// System state at encoding time
    pub state: ContextState,
    /// Event intensity
    pub intensity: IntensityLevel,
    /// Where the event came from
    pub source: String,
    /// Recognized metadata fields (user_id, session_id, version, environment, tags)
    pub metadata: Map<String, Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            state: ContextState::Normal,
            intensity: IntensityLevel::Medium,
            source: "unknown".to_string(),
            metadata: Map::new(),
        }
    }
}

impl Context {
    /// Snapshot as a JSON object for persisting with a memory item
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Tags from `metadata.tags`, if present
    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of encoding one raw event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedEvent {
    /// Recognized pattern
    pub pattern: Pattern,
    /// Contextual information
    pub context: Context,
    /// When encoding happened
    pub encoded_at: DateTime<Utc>,
    /// Summary of the raw input
    pub summary: RawEventSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_event_builder() {
        let event = RawEvent::new()
            .with("error", true)
            .with("error_type", "validation_error");
        assert!(event.has("error"));
        assert_eq!(event.get_str("error_type"), Some("validation_error"));
    }

    #[test]
    fn test_raw_event_from_non_object() {
        let event = RawEvent::from(json!("just a string"));
        assert_eq!(event.get_str("value"), Some("just a string"));
    }

    #[test]
    fn test_intensity_weights() {
        assert_eq!(IntensityLevel::Low.weight(), 0.5);
        assert_eq!(IntensityLevel::Medium.weight(), 1.0);
        assert_eq!(IntensityLevel::High.weight(), 1.5);
        assert_eq!(IntensityLevel::Critical.weight(), 2.0);
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ContextState::Normal,
            ContextState::Error,
            ContextState::HighActivity,
            ContextState::Processing,
        ] {
            assert_eq!(ContextState::parse_name(state.as_str()), state);
        }
    }

    #[test]
    fn test_context_tags() {
        let mut context = Context::default();
        context
            .metadata
            .insert("tags".to_string(), json!(["alpha", "beta"]));
        assert_eq!(context.tags(), vec!["alpha", "beta"]);
        assert!(Context::default().tags().is_empty());
    }

    #[test]
    fn test_event_type_serde_is_snake_case() {
        let serialized = serde_json::to_string(&EventType::MemoryAccess).unwrap();
        assert_eq!(serialized, "\"memory_access\"");
    }
}
