//! Feedback processing
//!
//! Bridges external feedback into learning-engine deltas and memory-store
//! strength updates. Feedback is queued, quality-weighted once at enqueue,
//! and applied in arrival-order batches by a single drain loop. A failed
//! batch is retried once whole; on the second failure each event is
//! re-attempted individually and failures are dropped with logging.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::learning::{FeedbackType, LearningEngine};
use crate::memory::{MemoryError, MemoryStore};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Feedback processor error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    /// A drain batch failed and was requeued for retry
    #[error("Feedback batch failed, requeued for retry: {0}")]
    Batch(String),
    /// Memory store failure
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Feedback result type
pub type Result<T> = std::result::Result<T, FeedbackError>;

// ============================================================================
// FEEDBACK TYPES
// ============================================================================

/// Sources of feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSource {
    /// User-provided feedback
    User,
    /// System-generated feedback
    #[default]
    System,
    /// Outcome-based feedback
    Outcome,
    /// Performance metrics feedback
    Performance,
    /// External system feedback
    External,
    /// Simulation-based feedback
    Simulation,
}

impl FeedbackSource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSource::User => "user",
            FeedbackSource::System => "system",
            FeedbackSource::Outcome => "outcome",
            FeedbackSource::Performance => "performance",
            FeedbackSource::External => "external",
            FeedbackSource::Simulation => "simulation",
        }
    }
}

impl std::fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality levels of feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackQuality {
    /// Explicit, clear feedback
    High,
    /// Implicit feedback with some clarity
    #[default]
    Medium,
    /// Ambiguous or weak feedback
    Low,
    /// Potentially noisy feedback
    Noise,
}

impl FeedbackQuality {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackQuality::High => "high",
            FeedbackQuality::Medium => "medium",
            FeedbackQuality::Low => "low",
            FeedbackQuality::Noise => "noise",
        }
    }

    /// Confidence multiplier for this quality level
    pub fn weight(&self) -> f64 {
        match self {
            FeedbackQuality::High => 1.0,
            FeedbackQuality::Medium => 0.7,
            FeedbackQuality::Low => 0.4,
            FeedbackQuality::Noise => 0.1,
        }
    }

    /// Map a numeric quality score to a quality level
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            FeedbackQuality::High
        } else if score >= 0.5 {
            FeedbackQuality::Medium
        } else if score >= 0.2 {
            FeedbackQuality::Low
        } else {
            FeedbackQuality::Noise
        }
    }
}

/// A feedback event awaiting processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    /// Memory the feedback concerns
    pub memory_id: String,
    /// Where the feedback came from
    pub source: FeedbackSource,
    /// Feedback classification
    pub feedback_type: FeedbackType,
    /// Quality assessment
    pub quality: FeedbackQuality,
    /// Feedback payload
    pub content: Map<String, Value>,
    /// When the feedback arrived
    pub timestamp: DateTime<Utc>,
    /// Quality-weighted confidence
    pub confidence: f64,
    /// Context the feedback arrived with
    pub context: Map<String, Value>,
    /// Optional scalar outcome value
    pub outcome_value: Option<f64>,
}

/// A learning update ready to apply to the memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningUpdate {
    /// Memory to update
    pub memory_id: String,
    /// Strength delta to apply
    pub strength_change: f64,
    /// Confidence behind the update
    pub confidence: f64,
    /// Why the update was made
    pub reasoning: String,
    /// When the update was derived
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned when feedback is enqueued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAck {
    /// Memory the feedback concerns
    pub memory_id: String,
    /// Feedback classification
    pub feedback_type: FeedbackType,
    /// Where the feedback came from
    pub source: FeedbackSource,
    /// Quality assessment
    pub quality: FeedbackQuality,
    /// Queue depth after enqueueing
    pub queue_size: usize,
}

/// Feedback processor statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStats {
    /// Feedback events received
    pub total_feedback_events: u64,
    /// Feedback events processed through a batch
    pub processed_feedback: u64,
    /// Learning updates applied to the store
    pub learning_updates_applied: u64,
    /// Events dropped by queue overflow or retry exhaustion
    pub dropped_events: u64,
    /// Whole-batch retries performed
    pub batch_retries: u64,
    /// Event count per source
    pub feedback_by_source: BTreeMap<String, u64>,
    /// Event count per quality level
    pub feedback_by_quality: BTreeMap<String, u64>,
    /// Running mean of weighted confidence
    pub average_feedback_confidence: f64,
    /// Current queue depth
    pub queue_size: usize,
}

#[derive(Debug, Default)]
struct FeedbackCounters {
    total_feedback_events: u64,
    processed_feedback: u64,
    learning_updates_applied: u64,
    dropped_events: u64,
    batch_retries: u64,
    feedback_by_source: BTreeMap<String, u64>,
    feedback_by_quality: BTreeMap<String, u64>,
    average_feedback_confidence: f64,
}

// ============================================================================
// FEEDBACK PROCESSOR
// ============================================================================

struct FeedbackInner {
    queue: VecDeque<FeedbackEvent>,
    processed: Vec<FeedbackEvent>,
    retry_pending: bool,
    counters: FeedbackCounters,
}

/// Feedback processor
///
/// The only component besides the memory store itself allowed to cause
/// strength mutations, which it does via `MemoryStore::update_strength`.
pub struct FeedbackProcessor {
    learning: Arc<LearningEngine>,
    memory: Arc<MemoryStore>,
    batch_size: usize,
    interval: Duration,
    queue_max: usize,
    history_bound: usize,
    history_trim_to: usize,
    inner: Mutex<FeedbackInner>,
}

impl FeedbackProcessor {
    /// Create a processor bridging the learning engine and memory store
    pub fn new(
        learning: Arc<LearningEngine>,
        memory: Arc<MemoryStore>,
        batch_size: usize,
        interval: Duration,
        queue_max: usize,
        history_bound: usize,
        history_trim_to: usize,
    ) -> Self {
        Self {
            learning,
            memory,
            batch_size,
            interval,
            queue_max,
            history_bound,
            history_trim_to,
            inner: Mutex::new(FeedbackInner {
                queue: VecDeque::new(),
                processed: Vec::new(),
                retry_pending: false,
                counters: FeedbackCounters::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedbackInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ========================================================================
    // ENQUEUE ENTRY POINTS
    // ========================================================================

    /// Enqueue a feedback event
    ///
    /// The event's confidence is multiplied by its quality weight exactly
    /// once, here. Flushes a batch inline when the queue reaches the batch
    /// size.
    pub fn process_feedback(
        &self,
        memory_id: &str,
        feedback_type: FeedbackType,
        outcome: Map<String, Value>,
        source: FeedbackSource,
        quality: FeedbackQuality,
        context: Option<Map<String, Value>>,
    ) -> FeedbackAck {
        let raw_confidence = outcome
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        let outcome_value = outcome.get("value").and_then(Value::as_f64);

        let event = FeedbackEvent {
            memory_id: memory_id.to_string(),
            source,
            feedback_type,
            quality,
            content: outcome,
            timestamp: Utc::now(),
            confidence: raw_confidence * quality.weight(),
            context: context.unwrap_or_default(),
            outcome_value,
        };

        let queue_size = {
            let mut inner = self.lock();
            self.record_enqueue(&mut inner, &event);
            inner.queue.push_back(event);
            while inner.queue.len() > self.queue_max {
                inner.queue.pop_front();
                inner.counters.dropped_events += 1;
                warn!("Feedback queue overflow, dropped oldest event");
            }
            inner.queue.len()
        };

        debug!("Queued feedback for memory {memory_id}: {feedback_type} from {source}");

        if queue_size >= self.batch_size {
            if let Err(drain_error) = self.drain_once() {
                warn!("Inline feedback flush failed: {drain_error}");
            }
        }

        let queue_size = self.lock().queue.len();
        FeedbackAck {
            memory_id: memory_id.to_string(),
            feedback_type,
            source,
            quality,
            queue_size,
        }
    }

    /// Process outcome-based feedback (expected vs actual)
    pub fn process_outcome_feedback(
        &self,
        memory_id: &str,
        expected: &Map<String, Value>,
        actual: &Map<String, Value>,
        context: Option<Map<String, Value>>,
    ) -> FeedbackAck {
        let outcome_quality = assess_outcome_quality(expected, actual);
        let discrepancy = outcome_discrepancy(expected, actual);
        let feedback_type = if discrepancy <= 0.2 {
            FeedbackType::Positive
        } else if discrepancy >= 0.8 {
            FeedbackType::Negative
        } else {
            FeedbackType::Neutral
        };

        // Clear matches and clear mismatches are both confident signals;
        // ambiguity in the middle is what lowers confidence.
        let confidence = outcome_quality.max(discrepancy);

        let mut outcome = Map::new();
        outcome.insert("expected".to_string(), Value::Object(expected.clone()));
        outcome.insert("actual".to_string(), Value::Object(actual.clone()));
        outcome.insert("quality".to_string(), Value::from(outcome_quality));
        outcome.insert("discrepancy".to_string(), Value::from(discrepancy));
        outcome.insert("confidence".to_string(), Value::from(confidence));

        self.process_feedback(
            memory_id,
            feedback_type,
            outcome,
            FeedbackSource::Outcome,
            FeedbackQuality::from_score(confidence),
            context,
        )
    }

    /// Process user-provided feedback from a rating in [0, 1]
    pub fn process_user_feedback(
        &self,
        memory_id: &str,
        rating: f64,
        comment: Option<&str>,
        context: Option<Map<String, Value>>,
    ) -> FeedbackAck {
        let (feedback_type, quality) = if rating >= 0.7 {
            (FeedbackType::Positive, FeedbackQuality::High)
        } else if rating <= 0.3 {
            (FeedbackType::Negative, FeedbackQuality::High)
        } else {
            (FeedbackType::Neutral, FeedbackQuality::Medium)
        };

        let mut content = Map::new();
        content.insert("rating".to_string(), Value::from(rating));
        if let Some(comment) = comment {
            content.insert("comment".to_string(), Value::from(comment));
        }
        content.insert("user_satisfaction".to_string(), Value::from(rating));

        self.process_feedback(
            memory_id,
            feedback_type,
            content,
            FeedbackSource::User,
            quality,
            context,
        )
    }

    /// Process performance-metric feedback
    pub fn process_performance_feedback(
        &self,
        memory_id: &str,
        metrics: &BTreeMap<String, f64>,
        context: Option<Map<String, Value>>,
    ) -> FeedbackAck {
        let overall = if metrics.is_empty() {
            0.5
        } else {
            metrics.values().sum::<f64>() / metrics.len() as f64
        };

        let (feedback_type, quality) = if overall >= 0.8 {
            (FeedbackType::Positive, FeedbackQuality::High)
        } else if overall <= 0.4 {
            (FeedbackType::Negative, FeedbackQuality::Medium)
        } else {
            (FeedbackType::Neutral, FeedbackQuality::Medium)
        };

        let mut content = Map::new();
        content.insert(
            "performance_metrics".to_string(),
            serde_json::to_value(metrics).unwrap_or_default(),
        );
        content.insert("overall_score".to_string(), Value::from(overall));

        self.process_feedback(
            memory_id,
            feedback_type,
            content,
            FeedbackSource::Performance,
            quality,
            context,
        )
    }

    // ========================================================================
    // DRAINING
    // ========================================================================

    /// Drain one batch from the queue head
    ///
    /// Returns the number of events processed. A whole-batch failure
    /// requeues the batch at the head and errors; the retried batch falls
    /// back to per-event application, dropping individual failures.
    pub fn drain_once(&self) -> Result<usize> {
        let (batch, is_retry) = {
            let mut inner = self.lock();
            let take = self.batch_size.min(inner.queue.len());
            let batch: Vec<FeedbackEvent> = inner.queue.drain(..take).collect();
            let is_retry = inner.retry_pending;
            (batch, is_retry)
        };

        if batch.is_empty() {
            return Ok(0);
        }

        if is_retry {
            self.apply_batch_isolated(&batch);
            let mut inner = self.lock();
            inner.retry_pending = false;
            let len = batch.len();
            self.finish_batch(&mut inner, batch);
            return Ok(len);
        }

        match self.apply_batch(&batch) {
            Ok(applied) => {
                let mut inner = self.lock();
                inner.counters.learning_updates_applied += applied;
                let len = batch.len();
                self.finish_batch(&mut inner, batch);
                Ok(len)
            }
            Err(batch_error) => {
                let mut inner = self.lock();
                inner.counters.batch_retries += 1;
                inner.retry_pending = true;
                for event in batch.into_iter().rev() {
                    inner.queue.push_front(event);
                }
                error!("Feedback batch failed, requeued: {batch_error}");
                Err(FeedbackError::Batch(batch_error.to_string()))
            }
        }
    }

    /// Drain until the queue is empty
    pub fn flush(&self) -> Result<usize> {
        let mut processed = 0;
        // Bounded by queue length plus one retry pass per batch.
        let max_rounds = 2 * (self.lock().queue.len() / self.batch_size.max(1) + 2);
        for _ in 0..max_rounds {
            if self.lock().queue.is_empty() {
                break;
            }
            match self.drain_once() {
                Ok(count) => processed += count,
                Err(_) => continue,
            }
        }
        Ok(processed)
    }

    /// Background drain loop on the configured interval
    pub fn spawn_drain_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let processor = Arc::clone(self);
        info!("Started feedback drain loop");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(processor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(drain_error) = processor.drain_once() {
                    warn!("Feedback drain failed: {drain_error}");
                }
            }
        })
    }

    /// Apply a batch, failing whole on the first store error
    fn apply_batch(&self, batch: &[FeedbackEvent]) -> std::result::Result<u64, MemoryError> {
        let mut applied = 0;
        for event in batch {
            if let Some(update) = self.derive_update(event) {
                self.memory
                    .update_strength(&update.memory_id, update.strength_change)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Apply a batch event-by-event, dropping failures with logging
    fn apply_batch_isolated(&self, batch: &[FeedbackEvent]) {
        let mut dropped = 0u64;
        let mut applied = 0u64;
        for event in batch {
            if let Some(update) = self.derive_update(event) {
                match self
                    .memory
                    .update_strength(&update.memory_id, update.strength_change)
                {
                    Ok(_) => applied += 1,
                    Err(apply_error) => {
                        dropped += 1;
                        error!(
                            "Dropping feedback for memory {}: {apply_error}",
                            event.memory_id
                        );
                    }
                }
            }
        }

        let mut inner = self.lock();
        inner.counters.learning_updates_applied += applied;
        inner.counters.dropped_events += dropped;
    }

    /// Consult the learning engine for one event's strength delta
    fn derive_update(&self, event: &FeedbackEvent) -> Option<LearningUpdate> {
        let mut outcome = event.content.clone();
        outcome.insert("confidence".to_string(), Value::from(event.confidence));
        outcome.insert("source".to_string(), Value::from(event.source.as_str()));
        outcome.insert("quality".to_string(), Value::from(event.quality.as_str()));

        let result = self.learning.process_feedback(
            &event.memory_id,
            event.feedback_type,
            &outcome,
            Some(&event.context),
        );

        (result.strength_change != 0.0).then(|| LearningUpdate {
            memory_id: event.memory_id.clone(),
            strength_change: result.strength_change,
            confidence: event.confidence,
            reasoning: format!(
                "Applied {} feedback from {}",
                event.feedback_type, event.source
            ),
            timestamp: Utc::now(),
        })
    }

    fn record_enqueue(&self, inner: &mut FeedbackInner, event: &FeedbackEvent) {
        let counters = &mut inner.counters;
        counters.total_feedback_events += 1;
        *counters
            .feedback_by_source
            .entry(event.source.as_str().to_string())
            .or_default() += 1;
        *counters
            .feedback_by_quality
            .entry(event.quality.as_str().to_string())
            .or_default() += 1;

        let total = counters.total_feedback_events as f64;
        counters.average_feedback_confidence =
            (counters.average_feedback_confidence * (total - 1.0) + event.confidence) / total;
    }

    fn finish_batch(&self, inner: &mut FeedbackInner, batch: Vec<FeedbackEvent>) {
        inner.counters.processed_feedback += batch.len() as u64;
        inner.processed.extend(batch);
        if inner.processed.len() > self.history_bound {
            let drain = inner.processed.len() - self.history_trim_to;
            inner.processed.drain(..drain);
        }
    }

    /// Feedback processor statistics
    pub fn statistics(&self) -> FeedbackStats {
        let inner = self.lock();
        FeedbackStats {
            total_feedback_events: inner.counters.total_feedback_events,
            processed_feedback: inner.counters.processed_feedback,
            learning_updates_applied: inner.counters.learning_updates_applied,
            dropped_events: inner.counters.dropped_events,
            batch_retries: inner.counters.batch_retries,
            feedback_by_source: inner.counters.feedback_by_source.clone(),
            feedback_by_quality: inner.counters.feedback_by_quality.clone(),
            average_feedback_confidence: inner.counters.average_feedback_confidence,
            queue_size: inner.queue.len(),
        }
    }

    /// Current queue depth
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }
}

// ============================================================================
// OUTCOME COMPARISON
// ============================================================================

/// Fraction of expected keys whose actual values match
fn assess_outcome_quality(expected: &Map<String, Value>, actual: &Map<String, Value>) -> f64 {
    if expected.is_empty() || actual.is_empty() {
        return 0.5;
    }

    let matching = expected
        .iter()
        .filter(|(key, value)| {
            actual
                .get(*key)
                .is_some_and(|actual_value| values_match(value, actual_value))
        })
        .count();

    matching as f64 / expected.len() as f64
}

/// Tolerant per-value comparison
fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected.as_f64(), actual.as_f64()) {
        (Some(e), Some(a)) => (e - a).abs() <= 0.1,
        _ => match (expected.as_str(), actual.as_str()) {
            (Some(e), Some(a)) => e.eq_ignore_ascii_case(a),
            _ => expected == actual,
        },
    }
}

/// Mean per-key discrepancy between expected and actual outcomes
fn outcome_discrepancy(expected: &Map<String, Value>, actual: &Map<String, Value>) -> f64 {
    if expected.is_empty() || actual.is_empty() {
        return 1.0;
    }

    let mut discrepancies = Vec::new();
    for (key, expected_value) in expected {
        let Some(actual_value) = actual.get(key) else {
            continue;
        };

        let discrepancy = match (expected_value.as_f64(), actual_value.as_f64()) {
            (Some(e), Some(a)) => {
                let scale = e.abs().max(a.abs()).max(1.0);
                (e - a).abs() / scale
            }
            _ => match (expected_value.as_str(), actual_value.as_str()) {
                (Some(e), Some(a)) => {
                    if e.eq_ignore_ascii_case(a) {
                        0.0
                    } else {
                        1.0
                    }
                }
                _ => {
                    if expected_value == actual_value {
                        0.0
                    } else {
                        1.0
                    }
                }
            },
        };
        discrepancies.push(discrepancy);
    }

    if discrepancies.is_empty() {
        1.0
    } else {
        discrepancies.iter().sum::<f64>() / discrepancies.len() as f64
    }
}

// ============================================================================
// TESTS
// ============================================================================
