//! Ingestion coordination
//!
//! Chains the pipeline for a single event: encode, pre-process, filter,
//! store, retrieve candidates, sparsely activate, log. Batch ingestion is
//! ordered fan-out over single ingestion; there is no global transaction.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::encoder::{Context, Encoder, Pattern, RawEvent};
use crate::memory::{MemoryError, MemoryItem, MemoryStore, NewMemory};
use crate::routing::{ActivationRequest, SparseRouter};
use crate::storage::{Persistence, PersistenceError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Ingestion error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// Memory store failure
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Event log failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Ingestion exceeded its timeout before the memory became durable
    #[error("Ingestion timed out after {0:.1}s")]
    Timeout(f64),
}

/// Ingestion result type
pub type Result<T> = std::result::Result<T, IngestionError>;

// ============================================================================
// INGESTION TYPES
// ============================================================================

/// Sources of ingested data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestionSource {
    #[default]
    Api,
    Webhook,
    File,
    Database,
    MessageQueue,
    Stream,
    Scheduled,
}

impl IngestionSource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionSource::Api => "api",
            IngestionSource::Webhook => "webhook",
            IngestionSource::File => "file",
            IngestionSource::Database => "database",
            IngestionSource::MessageQueue => "message_queue",
            IngestionSource::Stream => "stream",
            IngestionSource::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for IngestionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of an ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Completed,
    Failed,
    Filtered,
}

impl IngestionStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed => "failed",
            IngestionStatus::Filtered => "filtered",
        }
    }
}

/// Result of a single ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    /// Id of the stored memory (absent when filtered)
    pub memory_id: Option<String>,
    /// Final pipeline status
    pub status: IngestionStatus,
    /// Recognized pattern
    pub pattern: Pattern,
    /// Encoding context
    pub context: Context,
    /// Sparse activation over the retrieved candidates
    pub active_memories: Vec<MemoryItem>,
    /// End-to-end processing time in milliseconds
    pub processing_time_ms: f64,
}

/// Ingestion statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    /// Events received
    pub total_ingestions: u64,
    /// Events that completed the pipeline
    pub successful_ingestions: u64,
    /// Events that failed
    pub failed_ingestions: u64,
    /// Events rejected by a filter
    pub filtered_ingestions: u64,
    /// Event count per source
    pub events_by_source: BTreeMap<String, u64>,
    /// Running mean processing time in milliseconds
    pub average_processing_time_ms: f64,
}

#[derive(Debug, Default)]
struct IngestionCounters {
    total_ingestions: u64,
    successful_ingestions: u64,
    failed_ingestions: u64,
    filtered_ingestions: u64,
    events_by_source: BTreeMap<String, u64>,
    average_processing_time_ms: f64,
}

// ============================================================================
// HOOKS
// ============================================================================

/// A pre-processor transforms event fields before storage
pub trait PreProcessor: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &'static str;
    /// Transform the event fields
    fn process(&self, fields: Map<String, Value>, source: IngestionSource) -> Map<String, Value>;
}

/// A filter decides whether an event should be dropped
pub trait IngestFilter: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &'static str;
    /// Whether the event should be rejected
    fn rejects(&self, fields: &Map<String, Value>) -> bool;
}

/// Ensure required fields exist and coerce numeric-looking strings
pub struct ValidateData;

impl PreProcessor for ValidateData {
    fn name(&self) -> &'static str {
        "validate_data"
    }

    fn process(
        &self,
        mut fields: Map<String, Value>,
        source: IngestionSource,
    ) -> Map<String, Value> {
        if !fields.contains_key("timestamp") {
            fields.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        }
        if !fields.contains_key("source") {
            fields.insert("source".to_string(), json!(source.as_str()));
        }

        for (key, value) in fields.iter_mut() {
            if !(key.ends_with("_count") || key.ends_with("_id")) {
                continue;
            }
            if let Value::String(raw) = value {
                if let Ok(int) = raw.parse::<i64>() {
                    *value = json!(int);
                } else if let Ok(float) = raw.parse::<f64>() {
                    *value = json!(float);
                }
            }
        }

        fields
    }
}

/// Attach the ingestion envelope under `_ingestion`
pub struct EnrichMetadata;

impl PreProcessor for EnrichMetadata {
    fn name(&self) -> &'static str {
        "enrich_metadata"
    }

    fn process(
        &self,
        mut fields: Map<String, Value>,
        source: IngestionSource,
    ) -> Map<String, Value> {
        fields.insert(
            "_ingestion".to_string(),
            json!({
                "ingested_at": Utc::now().to_rfc3339(),
                "source": source.as_str(),
            }),
        );
        fields
    }
}

/// Reject tiny payloads and payloads with only envelope fields
pub struct LowQualityFilter;

const ENVELOPE_KEYS: &[&str] = &["timestamp", "source", "_ingestion", "metadata"];

impl IngestFilter for LowQualityFilter {
    fn name(&self) -> &'static str {
        "low_quality"
    }

    fn rejects(&self, fields: &Map<String, Value>) -> bool {
        let serialized = Value::Object(fields.clone()).to_string();
        if serialized.len() < 10 {
            return true;
        }

        let meaningful = fields
            .keys()
            .filter(|key| !ENVELOPE_KEYS.contains(&key.as_str()))
            .count();
        meaningful == 0
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Ingestion coordinator
///
/// Binds encoder, memory store, router, and event log into one pipeline.
pub struct IngestionCoordinator {
    encoder: Arc<Encoder>,
    memory: Arc<MemoryStore>,
    router: Arc<SparseRouter>,
    persistence: Arc<Persistence>,
    timeout: Duration,
    pre_processors: Mutex<Vec<Box<dyn PreProcessor>>>,
    filters: Mutex<Vec<Box<dyn IngestFilter>>>,
    counters: Mutex<IngestionCounters>,
}

impl IngestionCoordinator {
    /// Create a coordinator with the default validate/enrich/quality hooks
    pub fn new(
        encoder: Arc<Encoder>,
        memory: Arc<MemoryStore>,
        router: Arc<SparseRouter>,
        persistence: Arc<Persistence>,
        timeout: Duration,
    ) -> Self {
        Self {
            encoder,
            memory,
            router,
            persistence,
            timeout,
            pre_processors: Mutex::new(vec![Box::new(ValidateData), Box::new(EnrichMetadata)]),
            filters: Mutex::new(vec![Box::new(LowQualityFilter)]),
            counters: Mutex::new(IngestionCounters::default()),
        }
    }

    fn lock_counters(&self) -> MutexGuard<'_, IngestionCounters> {
        match self.counters.lock() {
            Ok(counters) => counters,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register an additional pre-processor (runs after the built-ins)
    pub fn add_pre_processor(&self, processor: Box<dyn PreProcessor>) {
        if let Ok(mut hooks) = self.pre_processors.lock() {
            hooks.push(processor);
        }
    }

    /// Register an additional filter
    pub fn add_filter(&self, filter: Box<dyn IngestFilter>) {
        if let Ok(mut hooks) = self.filters.lock() {
            hooks.push(filter);
        }
    }

    /// Ingest a single event
    pub fn ingest(&self, event: RawEvent, source: IngestionSource) -> Result<IngestionResult> {
        let start = Instant::now();

        {
            let mut counters = self.lock_counters();
            counters.total_ingestions += 1;
            *counters
                .events_by_source
                .entry(source.as_str().to_string())
                .or_default() += 1;
        }

        match self.run_pipeline(event, source, start) {
            Ok(result) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.log_ingestion(&result, source, elapsed_ms);
                self.record_outcome(result.status, elapsed_ms);
                Ok(result)
            }
            Err(pipeline_error) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.record_outcome(IngestionStatus::Failed, elapsed_ms);
                let log = json!({
                    "type": "ingestion_event",
                    "ids": [],
                    "source": source.as_str(),
                    "status": IngestionStatus::Failed.as_str(),
                    "processing_time": elapsed_ms,
                    "error": pipeline_error.to_string(),
                });
                if let Err(log_error) = self.persistence.log_event("ingestion_event", &log, source.as_str()) {
                    warn!("Failed to log failed ingestion: {log_error}");
                }
                Err(pipeline_error)
            }
        }
    }

    /// Ingest multiple events, preserving order
    pub fn ingest_batch(
        &self,
        events: Vec<RawEvent>,
        source: IngestionSource,
    ) -> Vec<Result<IngestionResult>> {
        events
            .into_iter()
            .map(|event| self.ingest(event, source))
            .collect()
    }

    fn run_pipeline(
        &self,
        event: RawEvent,
        source: IngestionSource,
        start: Instant,
    ) -> Result<IngestionResult> {
        // 1. encode (never fails, worst case is a fallback encoding)
        let encoded = self.encoder.encode(&event);
        let pattern = encoded.pattern;
        let context = encoded.context;

        // 2. pre-process the event data
        let mut fields = event.fields;
        if let Ok(hooks) = self.pre_processors.lock() {
            for hook in hooks.iter() {
                fields = hook.process(fields, source);
            }
        }

        // 3. filters: first acceptance short-circuits the pipeline
        if let Ok(hooks) = self.filters.lock() {
            for hook in hooks.iter() {
                if hook.rejects(&fields) {
                    debug!("Event filtered by {}", hook.name());
                    return Ok(IngestionResult {
                        memory_id: None,
                        status: IngestionStatus::Filtered,
                        pattern,
                        context,
                        active_memories: vec![],
                        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                    });
                }
            }
        }

        // last cancellation point: registered hooks above may consume the
        // budget; once store returns an id the memory is durable and the
        // timeout no longer applies
        if start.elapsed() > self.timeout {
            return Err(IngestionError::Timeout(self.timeout.as_secs_f64()));
        }

        // 4. create and store the memory
        let item = self.memory.create_item(NewMemory {
            pattern_signature: pattern.signature.clone(),
            content: json!({
                "raw": fields,
                "pattern": pattern,
            }),
            context: context.to_value(),
            tags: vec![source.as_str().to_string(), "ingested".to_string()],
            confidence: pattern.confidence,
            ..Default::default()
        });
        let memory_id = self.memory.store(item)?;

        // 5. retrieve candidates for the pattern under this context
        let context_map = context
            .to_value()
            .as_object()
            .cloned()
            .unwrap_or_default();
        let candidates = self.memory.retrieve(&pattern.signature, &context_map)?;

        // 6. sparse activation
        let active_memories = self
            .router
            .activate(&candidates, &ActivationRequest::from(&context));

        Ok(IngestionResult {
            memory_id: Some(memory_id),
            status: IngestionStatus::Completed,
            pattern,
            context,
            active_memories,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn log_ingestion(&self, result: &IngestionResult, source: IngestionSource, elapsed_ms: f64) {
        let ids: Vec<&String> = result.memory_id.iter().collect();
        let log = json!({
            "type": "ingestion_event",
            "ids": ids,
            "source": source.as_str(),
            "status": result.status.as_str(),
            "processing_time": elapsed_ms,
        });
        if let Err(log_error) = self
            .persistence
            .log_event("ingestion_event", &log, source.as_str())
        {
            warn!("Failed to log ingestion event: {log_error}");
        }
    }

    fn record_outcome(&self, status: IngestionStatus, elapsed_ms: f64) {
        let mut counters = self.lock_counters();
        match status {
            IngestionStatus::Completed => {
                counters.successful_ingestions += 1;
                let total = counters.successful_ingestions as f64;
                counters.average_processing_time_ms =
                    (counters.average_processing_time_ms * (total - 1.0) + elapsed_ms) / total;
            }
            IngestionStatus::Failed => counters.failed_ingestions += 1,
            IngestionStatus::Filtered => counters.filtered_ingestions += 1,
        }
    }

    /// Ingestion statistics
    pub fn statistics(&self) -> IngestionStats {
        let counters = self.lock_counters();
        IngestionStats {
            total_ingestions: counters.total_ingestions,
            successful_ingestions: counters.successful_ingestions,
            failed_ingestions: counters.failed_ingestions,
            filtered_ingestions: counters.filtered_ingestions,
            events_by_source: counters.events_by_source.clone(),
            average_processing_time_ms: counters.average_processing_time_ms,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
