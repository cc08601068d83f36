//! Incremental learning engine
//!
//! Local, rule-based strength-delta calculation without global updates: no
//! gradient descent, no batch retraining. The engine computes deltas from
//! feedback, access patterns, co-occurrence, and time decay; persistence of
//! the resulting strength changes is the caller's concern.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

// ============================================================================
// FEEDBACK & EVENT TYPES
// ============================================================================

/// Types of feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Positive,
    Negative,
    #[default]
    Neutral,
    Correction,
    Confirmation,
}

impl FeedbackType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
            FeedbackType::Neutral => "neutral",
            FeedbackType::Correction => "correction",
            FeedbackType::Confirmation => "confirmation",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "positive" => Some(FeedbackType::Positive),
            "negative" => Some(FeedbackType::Negative),
            "neutral" => Some(FeedbackType::Neutral),
            "correction" => Some(FeedbackType::Correction),
            "confirmation" => Some(FeedbackType::Confirmation),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of event driving a learning update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningEventType {
    Feedback,
    Access,
    Association,
    Decay,
}

/// One learning event, kept in bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    /// Memory the event concerns
    pub memory_id: String,
    /// What kind of event this is
    pub event_type: LearningEventType,
    /// Feedback classification
    pub feedback_type: FeedbackType,
    /// Context the event arrived with
    pub context: Map<String, Value>,
    /// Outcome payload
    pub outcome: Map<String, Value>,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Confidence in the event
    pub confidence: f64,
}

// ============================================================================
// LEARNING RULES
// ============================================================================

/// Built-in learning rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    BasicReinforcement,
    FrequencyStrengthening,
    ContextualReinforcement,
    AssociationFormation,
    TimeForgetting,
}

impl RuleKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::BasicReinforcement => "basic_reinforcement",
            RuleKind::FrequencyStrengthening => "frequency_strengthening",
            RuleKind::ContextualReinforcement => "contextual_reinforcement",
            RuleKind::AssociationFormation => "association_formation",
            RuleKind::TimeForgetting => "time_forgetting",
        }
    }
}

/// A learning rule with its activation weight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRule {
    /// Which built-in rule this is
    pub kind: RuleKind,
    /// Human-readable description
    pub description: String,
    /// Contribution weight in the final delta
    pub weight: f64,
    /// Whether the rule participates
    pub enabled: bool,
}

fn default_rules() -> Vec<LearningRule> {
    vec![
        LearningRule {
            kind: RuleKind::BasicReinforcement,
            description: "Basic positive/negative reinforcement".to_string(),
            weight: 1.0,
            enabled: true,
        },
        LearningRule {
            kind: RuleKind::FrequencyStrengthening,
            description: "Strengthen frequently accessed memories".to_string(),
            weight: 0.5,
            enabled: true,
        },
        LearningRule {
            kind: RuleKind::ContextualReinforcement,
            description: "Strengthen memories with similar context".to_string(),
            weight: 0.3,
            enabled: true,
        },
        LearningRule {
            kind: RuleKind::AssociationFormation,
            description: "Form associations between co-occurring memories".to_string(),
            weight: 0.4,
            enabled: true,
        },
        LearningRule {
            kind: RuleKind::TimeForgetting,
            description: "Gradual forgetting of unused memories".to_string(),
            weight: 0.2,
            enabled: true,
        },
    ]
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Result of one learning calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningResult {
    /// Total weighted strength delta
    pub strength_change: f64,
    /// Unweighted delta each rule contributed
    pub rule_contributions: BTreeMap<String, f64>,
    /// Confidence the calculation used
    pub confidence: f64,
    /// Learning rate at calculation time
    pub learning_rate: f64,
}

/// Pairwise association update from a co-occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationUpdate {
    /// First memory of the pair
    pub memory_id_1: String,
    /// Second memory of the pair
    pub memory_id_2: String,
    /// Weighted strength delta for the pair
    pub strength_change: f64,
    /// Input co-occurrence strength
    pub co_occurrence_strength: f64,
}

/// Outcome of a time-decay pass over the adaptive parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayAdjustment {
    /// `exp(-forgetting_rate * days)`
    pub decay_factor: f64,
    /// Current forgetting rate
    pub forgetting_rate: f64,
    /// Learning rate after the adjustment
    pub adjusted_learning_rate: f64,
}

/// Learning engine statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    /// Total learning events processed
    pub total_learning_events: u64,
    /// Positive feedback events
    pub positive_feedback: u64,
    /// Negative feedback events
    pub negative_feedback: u64,
    /// Pairwise associations formed
    pub associations_formed: u64,
    /// Events producing a positive delta
    pub memories_strengthened: u64,
    /// Events producing a negative delta
    pub memories_weakened: u64,
    /// Rules currently enabled
    pub active_rules: usize,
    /// Current learning rate
    pub learning_rate: f64,
    /// Current forgetting rate
    pub forgetting_rate: f64,
    /// Rule table
    pub rules: Vec<LearningRule>,
}

#[derive(Debug, Default)]
struct LearningCounters {
    total_learning_events: u64,
    positive_feedback: u64,
    negative_feedback: u64,
    associations_formed: u64,
    memories_strengthened: u64,
    memories_weakened: u64,
}

// ============================================================================
// LEARNING ENGINE
// ============================================================================

struct LearningInner {
    rules: Vec<LearningRule>,
    history: Vec<LearningEvent>,
    counters: LearningCounters,
    learning_rate: f64,
    forgetting_rate: f64,
}

/// Incremental learning engine
pub struct LearningEngine {
    history_bound: usize,
    history_trim_to: usize,
    inner: Mutex<LearningInner>,
}

impl LearningEngine {
    /// Create an engine with the given rates and history bounds
    pub fn new(
        learning_rate: f64,
        forgetting_rate: f64,
        history_bound: usize,
        history_trim_to: usize,
    ) -> Self {
        Self {
            history_bound,
            history_trim_to,
            inner: Mutex::new(LearningInner {
                rules: default_rules(),
                history: Vec::new(),
                counters: LearningCounters::default(),
                learning_rate,
                forgetting_rate,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LearningInner> {
        // A poisoned lock only ever holds plain counters and rule flags;
        // recover the data rather than wedging the learning loop.
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Process a feedback event, returning the weighted strength delta
    pub fn process_feedback(
        &self,
        memory_id: &str,
        feedback_type: FeedbackType,
        outcome: &Map<String, Value>,
        context: Option<&Map<String, Value>>,
    ) -> LearningResult {
        let mut inner = self.lock();

        let confidence = outcome
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        let base_change = base_feedback_change(feedback_type, outcome, inner.learning_rate)
            * confidence;

        let context_map = context.cloned().unwrap_or_default();
        let similarity = context_similarity(&context_map, &inner.history);

        let mut total_change = 0.0;
        let mut rule_contributions = BTreeMap::new();
        for rule in inner.rules.iter().filter(|rule| rule.enabled) {
            let delta = match rule.kind {
                RuleKind::BasicReinforcement => base_change,
                RuleKind::ContextualReinforcement => base_change * similarity,
                _ => 0.0,
            };
            if delta != 0.0 {
                total_change += delta * rule.weight;
                rule_contributions.insert(rule.kind.as_str().to_string(), delta);
            }
        }

        let event = LearningEvent {
            memory_id: memory_id.to_string(),
            event_type: LearningEventType::Feedback,
            feedback_type,
            context: context_map,
            outcome: outcome.clone(),
            timestamp: Utc::now(),
            confidence,
        };
        self.record_event(&mut inner, event, feedback_type, total_change);

        debug!(
            "Learning: memory {memory_id}, feedback {feedback_type}, change {total_change}"
        );

        LearningResult {
            strength_change: total_change,
            rule_contributions,
            confidence,
            learning_rate: inner.learning_rate,
        }
    }

    /// Process an access event, returning the frequency-strengthening delta
    pub fn process_access(
        &self,
        memory_id: &str,
        access_context: &Map<String, Value>,
        access_count: u64,
    ) -> LearningResult {
        let mut inner = self.lock();

        let frequency_bonus = access_strength_change(access_count);
        let mut total_change = 0.0;
        let mut rule_contributions = BTreeMap::new();

        if let Some(rule) = inner
            .rules
            .iter()
            .find(|rule| rule.kind == RuleKind::FrequencyStrengthening && rule.enabled)
        {
            total_change = frequency_bonus * rule.weight;
            rule_contributions.insert(rule.kind.as_str().to_string(), frequency_bonus);
        }

        let mut outcome = Map::new();
        outcome.insert("access_count".to_string(), Value::from(access_count));
        let event = LearningEvent {
            memory_id: memory_id.to_string(),
            event_type: LearningEventType::Access,
            feedback_type: FeedbackType::Neutral,
            context: access_context.clone(),
            outcome,
            timestamp: Utc::now(),
            confidence: 1.0,
        };
        self.record_event(&mut inner, event, FeedbackType::Neutral, total_change);

        LearningResult {
            strength_change: total_change,
            rule_contributions,
            confidence: 1.0,
            learning_rate: inner.learning_rate,
        }
    }

    /// Process a co-occurrence of memories, forming pairwise associations
    pub fn process_co_occurrence(
        &self,
        memory_ids: &[String],
        co_occurrence_strength: f64,
    ) -> Vec<AssociationUpdate> {
        let mut inner = self.lock();

        let Some(rule) = inner
            .rules
            .iter()
            .find(|rule| rule.kind == RuleKind::AssociationFormation && rule.enabled)
            .cloned()
        else {
            return vec![];
        };

        let mut updates = Vec::new();
        for (index, first) in memory_ids.iter().enumerate() {
            for second in memory_ids.iter().skip(index + 1) {
                let delta = co_occurrence_strength * 0.1;
                updates.push(AssociationUpdate {
                    memory_id_1: first.clone(),
                    memory_id_2: second.clone(),
                    strength_change: delta * rule.weight,
                    co_occurrence_strength,
                });

                let mut context = Map::new();
                context.insert("associated_memory".to_string(), Value::from(second.clone()));
                let mut outcome = Map::new();
                outcome.insert(
                    "co_occurrence_strength".to_string(),
                    Value::from(co_occurrence_strength),
                );
                let event = LearningEvent {
                    memory_id: first.clone(),
                    event_type: LearningEventType::Association,
                    feedback_type: FeedbackType::Positive,
                    context,
                    outcome,
                    timestamp: Utc::now(),
                    confidence: 1.0,
                };
                self.record_event(&mut inner, event, FeedbackType::Positive, delta * rule.weight);
            }
        }

        inner.counters.associations_formed += updates.len() as u64;
        debug!("Formed {} associations", updates.len());
        updates
    }

    /// Compute the time-forgetting delta for a memory idle for `days`
    pub fn process_decay(&self, memory_id: &str, days: f64) -> LearningResult {
        let mut inner = self.lock();

        let decay_factor = (-inner.forgetting_rate * days).exp();
        let mut total_change = 0.0;
        let mut rule_contributions = BTreeMap::new();

        if let Some(rule) = inner
            .rules
            .iter()
            .find(|rule| rule.kind == RuleKind::TimeForgetting && rule.enabled)
        {
            let delta = (decay_factor - 1.0) * 0.1;
            total_change = delta * rule.weight;
            rule_contributions.insert(rule.kind.as_str().to_string(), delta);
        }

        let mut outcome = Map::new();
        outcome.insert("decay_factor".to_string(), Value::from(decay_factor));
        let event = LearningEvent {
            memory_id: memory_id.to_string(),
            event_type: LearningEventType::Decay,
            feedback_type: FeedbackType::Neutral,
            context: Map::new(),
            outcome,
            timestamp: Utc::now(),
            confidence: 1.0,
        };
        self.record_event(&mut inner, event, FeedbackType::Neutral, total_change);

        LearningResult {
            strength_change: total_change,
            rule_contributions,
            confidence: 1.0,
            learning_rate: inner.learning_rate,
        }
    }

    /// Nudge the adaptive rates after a decay pass
    pub fn apply_time_decay(&self, days_passed: f64) -> DecayAdjustment {
        let mut inner = self.lock();

        let decay_factor = (-inner.forgetting_rate * days_passed).exp();
        if decay_factor < 0.5 {
            inner.learning_rate = (inner.learning_rate * 1.1).min(0.1);
        } else {
            inner.learning_rate = (inner.learning_rate * 0.95).max(0.001);
        }

        DecayAdjustment {
            decay_factor,
            forgetting_rate: inner.forgetting_rate,
            adjusted_learning_rate: inner.learning_rate,
        }
    }

    /// Adapt learning parameters from performance feedback
    pub fn adapt_parameters(&self, accuracy: f64, stability: f64) {
        let mut inner = self.lock();

        if accuracy < 0.5 {
            inner.learning_rate = (inner.learning_rate * 1.2).min(0.1);
        } else if accuracy > 0.8 {
            inner.learning_rate = (inner.learning_rate * 0.9).max(0.001);
        }

        if stability < 0.3 {
            inner.forgetting_rate = (inner.forgetting_rate * 0.9).max(1e-4);
        } else if stability > 0.8 {
            inner.forgetting_rate = (inner.forgetting_rate * 1.1).min(0.01);
        }

        debug!(
            "Adapted learning parameters: rate={}, decay={}",
            inner.learning_rate, inner.forgetting_rate
        );
    }

    /// Enable a rule by name; returns whether the name matched
    pub fn enable_rule(&self, name: &str) -> bool {
        self.set_rule_enabled(name, true)
    }

    /// Disable a rule by name; returns whether the name matched
    pub fn disable_rule(&self, name: &str) -> bool {
        self.set_rule_enabled(name, false)
    }

    fn set_rule_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut inner = self.lock();
        for rule in &mut inner.rules {
            if rule.kind.as_str() == name {
                rule.enabled = enabled;
                info!(
                    "{} learning rule: {name}",
                    if enabled { "Enabled" } else { "Disabled" }
                );
                return true;
            }
        }
        false
    }

    /// Current adaptive rates `(learning_rate, forgetting_rate)`
    pub fn rates(&self) -> (f64, f64) {
        let inner = self.lock();
        (inner.learning_rate, inner.forgetting_rate)
    }

    /// Restore adaptive rates (used when rehydrating persisted state)
    pub fn set_rates(&self, learning_rate: f64, forgetting_rate: f64) {
        let mut inner = self.lock();
        inner.learning_rate = learning_rate.clamp(0.001, 0.1);
        inner.forgetting_rate = forgetting_rate.clamp(1e-4, 0.01);
    }

    /// Learning engine statistics
    pub fn statistics(&self) -> LearningStats {
        let inner = self.lock();
        LearningStats {
            total_learning_events: inner.counters.total_learning_events,
            positive_feedback: inner.counters.positive_feedback,
            negative_feedback: inner.counters.negative_feedback,
            associations_formed: inner.counters.associations_formed,
            memories_strengthened: inner.counters.memories_strengthened,
            memories_weakened: inner.counters.memories_weakened,
            active_rules: inner.rules.iter().filter(|rule| rule.enabled).count(),
            learning_rate: inner.learning_rate,
            forgetting_rate: inner.forgetting_rate,
            rules: inner.rules.clone(),
        }
    }

    fn record_event(
        &self,
        inner: &mut LearningInner,
        event: LearningEvent,
        feedback_type: FeedbackType,
        strength_change: f64,
    ) {
        inner.counters.total_learning_events += 1;
        match feedback_type {
            FeedbackType::Positive => inner.counters.positive_feedback += 1,
            FeedbackType::Negative => inner.counters.negative_feedback += 1,
            _ => {}
        }
        if strength_change > 0.0 {
            inner.counters.memories_strengthened += 1;
        } else if strength_change < 0.0 {
            inner.counters.memories_weakened += 1;
        }

        inner.history.push(event);
        if inner.history.len() > self.history_bound {
            let drain = inner.history.len() - self.history_trim_to;
            inner.history.drain(..drain);
        }
    }
}

// ============================================================================
// RULE MATH
// ============================================================================

/// Signed base delta for a feedback type
fn base_feedback_change(
    feedback_type: FeedbackType,
    outcome: &Map<String, Value>,
    learning_rate: f64,
) -> f64 {
    match feedback_type {
        FeedbackType::Positive => {
            learning_rate * outcome.get("reward").and_then(Value::as_f64).unwrap_or(1.0)
        }
        FeedbackType::Negative => {
            -learning_rate * outcome.get("penalty").and_then(Value::as_f64).unwrap_or(1.0)
        }
        FeedbackType::Correction => learning_rate * 0.5,
        FeedbackType::Confirmation => learning_rate * 0.3,
        FeedbackType::Neutral => 0.0,
    }
}

/// Diminishing-returns strengthening for repeated access
fn access_strength_change(access_count: u64) -> f64 {
    if access_count <= 1 {
        0.01
    } else {
        0.01 * ((access_count + 1) as f64).ln()
    }
}

/// Mean context similarity against the recent learning history
fn context_similarity(context: &Map<String, Value>, history: &[LearningEvent]) -> f64 {
    if context.is_empty() {
        return 0.0;
    }

    let mut similarities = Vec::new();
    for event in history.iter().rev().take(100) {
        if event.context.is_empty() {
            continue;
        }
        let mut common = 0usize;
        let mut matches = 0usize;
        for (key, value) in context {
            if let Some(event_value) = event.context.get(key) {
                common += 1;
                if event_value == value {
                    matches += 1;
                }
            }
        }
        if common > 0 {
            similarities.push(matches as f64 / common as f64);
        }
    }

    if similarities.is_empty() {
        0.0
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    }
}

// ============================================================================
// TESTS
// ============================================================================
