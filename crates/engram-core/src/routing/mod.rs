//! Sparse activation routing
//!
//! Given a candidate set and a context, selects the small activated subset
//! that represents the current foreground. Only a fraction of candidates
//! should activate at once; the router enforces this with competitive
//! scoring, a global adaptive threshold, and per-call activation budgets.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::encoder::{Context, ContextState, IntensityLevel};
use crate::memory::MemoryItem;

/// Bounded activation history size
const HISTORY_BOUND: usize = 1000;
const HISTORY_TRIM_TO: usize = 500;

/// Activations considered "recent" for the statistics view
const RECENT_WINDOW: usize = 100;

/// Score multiplier applied to same-signature competitors after an admission
const LATERAL_INHIBITION: f64 = 0.5;

// ============================================================================
// ACTIVATION TYPES
// ============================================================================

/// Methods for memory activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMethod {
    /// Strength-based threshold
    #[default]
    Threshold,
    /// Top-K activation
    WinnerTakesAll,
    /// Maximum active fraction of candidates
    Sparsity,
    /// Threshold adapted to the score distribution
    Adaptive,
    /// Budgeted admission with lateral inhibition
    Competitive,
}

impl ActivationMethod {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationMethod::Threshold => "threshold",
            ActivationMethod::WinnerTakesAll => "winner_takes_all",
            ActivationMethod::Sparsity => "sparsity",
            ActivationMethod::Adaptive => "adaptive",
            ActivationMethod::Competitive => "competitive",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "threshold" => Some(ActivationMethod::Threshold),
            "winner_takes_all" => Some(ActivationMethod::WinnerTakesAll),
            "sparsity" => Some(ActivationMethod::Sparsity),
            "adaptive" => Some(ActivationMethod::Adaptive),
            "competitive" => Some(ActivationMethod::Competitive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of an activation outcome, used for telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Dormant,
    WeaklyActive,
    Active,
    StronglyActive,
    Overload,
}

impl ActivationState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationState::Dormant => "dormant",
            ActivationState::WeaklyActive => "weakly_active",
            ActivationState::Active => "active",
            ActivationState::StronglyActive => "strongly_active",
            ActivationState::Overload => "overload",
        }
    }
}

/// Input context for an activation call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    /// System state to match against candidate contexts
    pub state: ContextState,
    /// Input intensity
    pub intensity: IntensityLevel,
    /// Tags to score overlap against
    pub tags: Vec<String>,
    /// Explicit method selection (defaults to THRESHOLD)
    pub method: Option<ActivationMethod>,
    /// Per-call activation budget for COMPETITIVE admission
    pub budget: f64,
    /// Override for the target activation count
    pub target_count: Option<usize>,
}

impl Default for ActivationRequest {
    fn default() -> Self {
        Self {
            state: ContextState::Normal,
            intensity: IntensityLevel::Medium,
            tags: vec![],
            method: None,
            budget: 1.0,
            target_count: None,
        }
    }
}

impl From<&Context> for ActivationRequest {
    fn from(context: &Context) -> Self {
        Self {
            state: context.state,
            intensity: context.intensity,
            tags: context.tags(),
            ..Default::default()
        }
    }
}

/// One recorded activation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivationRecord {
    active_count: usize,
    candidate_count: usize,
    budget_used: f64,
    method: ActivationMethod,
    state: ActivationState,
    timestamp: DateTime<Utc>,
}

/// Router statistics and performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    /// Total activation calls
    pub total_activations: u64,
    /// Running mean of activated memory count
    pub average_active_memories: f64,
    /// Threshold adaptation events
    pub threshold_adjustments: u64,
    /// Activations classified as OVERLOAD
    pub overload_events: u64,
    /// Activations exceeding twice the target sparsity
    pub sparsity_violations: u64,
    /// Current adaptive threshold
    pub global_threshold: f64,
    /// Configured activation cap
    pub max_active_memories: usize,
    /// Configured sparsity target
    pub target_sparsity: f64,
    /// State distribution over the recent window
    pub recent_activation_states: BTreeMap<String, usize>,
    /// Mean budget used over the recent window
    pub average_budget_used: f64,
    /// Memories activated more than five times
    pub frequently_activated: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct RouterCounters {
    total_activations: u64,
    average_active_memories: f64,
    threshold_adjustments: u64,
    overload_events: u64,
    sparsity_violations: u64,
}

struct RouterState {
    global_threshold: f64,
    history: VecDeque<ActivationRecord>,
    activation_counts: HashMap<String, u64>,
    counters: RouterCounters,
}

/// Internal per-call activation parameters
struct ActivationContext {
    input_intensity: f64,
    budget: f64,
    target_count: usize,
    target_sparsity: f64,
    method: ActivationMethod,
    quality_threshold: f64,
}

// ============================================================================
// SPARSE ROUTER
// ============================================================================

/// Sparse activation router
///
/// Pure with respect to the memory store: it scores the candidate snapshot
/// it is handed and never mutates memories. Any failure inside a method
/// degrades to a plain threshold filter.
pub struct SparseRouter {
    target_sparsity: f64,
    max_active: usize,
    initial_threshold: f64,
    inner: Mutex<RouterState>,
}

impl SparseRouter {
    /// Create a router with the given sparsity target, activation cap, and
    /// starting threshold
    pub fn new(target_sparsity: f64, max_active: usize, initial_threshold: f64) -> Self {
        Self {
            target_sparsity,
            max_active,
            initial_threshold,
            inner: Mutex::new(RouterState {
                global_threshold: initial_threshold,
                history: VecDeque::new(),
                activation_counts: HashMap::new(),
                counters: RouterCounters::default(),
            }),
        }
    }

    /// Current adaptive threshold
    pub fn current_threshold(&self) -> f64 {
        self.inner
            .lock()
            .map(|state| state.global_threshold)
            .unwrap_or(self.initial_threshold)
    }

    /// Force the adaptive threshold (clamped to its working range)
    pub fn set_threshold(&self, threshold: f64) {
        if let Ok(mut state) = self.inner.lock() {
            state.global_threshold = threshold.clamp(0.01, 0.9);
        }
    }

    /// Activate relevant memories out of the candidate set
    ///
    /// Returns activated memories in admission order. Falls back to a
    /// simple strength threshold if anything inside the call fails.
    pub fn activate(
        &self,
        candidates: &[MemoryItem],
        request: &ActivationRequest,
    ) -> Vec<MemoryItem> {
        match self.try_activate(candidates, request) {
            Ok(active) => active,
            Err(error) => {
                warn!("Sparse activation failed, using threshold fallback: {error}");
                let threshold = self.current_threshold();
                candidates
                    .iter()
                    .filter(|m| m.strength > threshold)
                    .cloned()
                    .collect()
            }
        }
    }

    fn try_activate(
        &self,
        candidates: &[MemoryItem],
        request: &ActivationRequest,
    ) -> Result<Vec<MemoryItem>, String> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| "router lock poisoned".to_string())?;

        let context = self.create_activation_context(request, candidates.len(), &state);
        let mut scores = self.calculate_scores(candidates, &context, request);
        let active = apply_method(candidates, &mut scores, &context)?;

        let budget_used: f64 = active.iter().map(|m| m.strength * 0.1).sum();
        let activation_state = classify(&active, context.target_count);
        let record = ActivationRecord {
            active_count: active.len(),
            candidate_count: candidates.len(),
            budget_used,
            method: context.method,
            state: activation_state,
            timestamp: Utc::now(),
        };

        self.record_activation(&mut state, record, &active);
        self.adapt_parameters(&mut state, active.len(), candidates.len());

        debug!(
            "Activated {} of {} candidates via {}",
            active.len(),
            candidates.len(),
            context.method
        );
        Ok(active)
    }

    fn create_activation_context(
        &self,
        request: &ActivationRequest,
        candidate_count: usize,
        state: &RouterState,
    ) -> ActivationContext {
        let target_count = request.target_count.unwrap_or_else(|| {
            ((candidate_count as f64 * self.target_sparsity) as usize)
                .max(1)
                .min(self.max_active)
        });

        ActivationContext {
            input_intensity: request.intensity.weight(),
            budget: request.budget,
            target_count,
            target_sparsity: self.target_sparsity,
            method: request.method.unwrap_or_default(),
            quality_threshold: state.global_threshold,
        }
    }

    fn calculate_scores(
        &self,
        candidates: &[MemoryItem],
        context: &ActivationContext,
        request: &ActivationRequest,
    ) -> HashMap<String, f64> {
        let now = Utc::now();
        candidates
            .iter()
            .map(|memory| {
                let base = memory.strength * 0.4;
                let relevance = context_relevance(memory, request) * 0.3;
                let recency = recency_bonus(memory, now) * 0.2;
                let intensity = (context.input_intensity - 1.0) * 0.1;
                let competition = competition_factor(memory, candidates);

                let score = ((base + relevance + recency + intensity) * competition).max(0.0);
                (memory.id.clone(), score)
            })
            .collect()
    }

    fn record_activation(
        &self,
        state: &mut RouterState,
        record: ActivationRecord,
        active: &[MemoryItem],
    ) {
        for memory in active {
            *state.activation_counts.entry(memory.id.clone()).or_default() += 1;
        }

        let counters = &mut state.counters;
        counters.total_activations += 1;
        counters.average_active_memories = (counters.average_active_memories
            * (counters.total_activations - 1) as f64
            + record.active_count as f64)
            / counters.total_activations as f64;

        if record.state == ActivationState::Overload {
            counters.overload_events += 1;
        }

        let sparsity = record.active_count as f64 / record.candidate_count.max(1) as f64;
        if sparsity > self.target_sparsity * 2.0 {
            counters.sparsity_violations += 1;
        }

        state.history.push_back(record);
        if state.history.len() > HISTORY_BOUND {
            let drain = state.history.len() - HISTORY_TRIM_TO;
            state.history.drain(..drain);
        }
    }

    fn adapt_parameters(&self, state: &mut RouterState, active_count: usize, candidate_count: usize) {
        let current_sparsity = active_count as f64 / candidate_count.max(1) as f64;

        if current_sparsity > self.target_sparsity * 1.5 {
            state.global_threshold *= 1.1;
            state.counters.threshold_adjustments += 1;
        } else if current_sparsity < self.target_sparsity * 0.5 {
            state.global_threshold *= 0.9;
            state.counters.threshold_adjustments += 1;
        }

        state.global_threshold = state.global_threshold.clamp(0.01, 0.9);
    }

    /// Activation statistics and performance metrics
    pub fn statistics(&self) -> RouterStats {
        let state = match self.inner.lock() {
            Ok(state) => state,
            Err(_) => {
                return RouterStats {
                    total_activations: 0,
                    average_active_memories: 0.0,
                    threshold_adjustments: 0,
                    overload_events: 0,
                    sparsity_violations: 0,
                    global_threshold: self.initial_threshold,
                    max_active_memories: self.max_active,
                    target_sparsity: self.target_sparsity,
                    recent_activation_states: BTreeMap::new(),
                    average_budget_used: 0.0,
                    frequently_activated: BTreeMap::new(),
                }
            }
        };

        let recent: Vec<&ActivationRecord> =
            state.history.iter().rev().take(RECENT_WINDOW).collect();

        let mut recent_activation_states: BTreeMap<String, usize> = BTreeMap::new();
        let mut budget_sum = 0.0;
        for record in &recent {
            *recent_activation_states
                .entry(record.state.as_str().to_string())
                .or_default() += 1;
            budget_sum += record.budget_used;
        }

        RouterStats {
            total_activations: state.counters.total_activations,
            average_active_memories: state.counters.average_active_memories,
            threshold_adjustments: state.counters.threshold_adjustments,
            overload_events: state.counters.overload_events,
            sparsity_violations: state.counters.sparsity_violations,
            global_threshold: state.global_threshold,
            max_active_memories: self.max_active,
            target_sparsity: self.target_sparsity,
            recent_activation_states,
            average_budget_used: if recent.is_empty() {
                0.0
            } else {
                budget_sum / recent.len() as f64
            },
            frequently_activated: state
                .activation_counts
                .iter()
                .filter(|(_, count)| **count > 5)
                .map(|(id, count)| (id.clone(), *count))
                .collect(),
        }
    }
}

// ============================================================================
// SCORE COMPOSITION
// ============================================================================

/// Context relevance: state match 0.3, intensity proximity 0.2, tag overlap
/// up to 0.2
fn context_relevance(memory: &MemoryItem, request: &ActivationRequest) -> f64 {
    let mut relevance = 0.0;

    let memory_state = memory
        .context
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if memory_state == request.state.as_str() {
        relevance += 0.3;
    }

    let memory_intensity = memory
        .context
        .get("intensity")
        .and_then(Value::as_str)
        .map(IntensityLevel::parse_name)
        .unwrap_or_default()
        .weight();
    if (memory_intensity - request.intensity.weight()).abs() < 0.5 {
        relevance += 0.2;
    }

    let tag_overlap = request
        .tags
        .iter()
        .filter(|tag| memory.tags.contains(*tag))
        .count();
    if tag_overlap > 0 {
        relevance += 0.2 * (tag_overlap as f64 / 3.0).min(1.0);
    }

    relevance.min(1.0)
}

/// Recency bonus: 0.5 if accessed today, exponentially less afterwards
fn recency_bonus(memory: &MemoryItem, now: DateTime<Utc>) -> f64 {
    let days_since = (now - memory.last_accessed).num_days();
    if days_since <= 0 {
        0.5
    } else if days_since < 7 {
        0.3 * (-(days_since as f64) / 7.0).exp()
    } else if days_since < 30 {
        0.1 * (-(days_since as f64) / 30.0).exp()
    } else {
        0.0
    }
}

/// Penalize candidates sharing a pattern signature with many others
fn competition_factor(memory: &MemoryItem, all: &[MemoryItem]) -> f64 {
    let similar = all
        .iter()
        .filter(|other| other.id != memory.id && other.pattern_signature == memory.pattern_signature)
        .count();
    1.0 - (similar as f64 * 0.1).min(0.5)
}

// ============================================================================
// ACTIVATION METHODS
// ============================================================================

fn apply_method(
    candidates: &[MemoryItem],
    scores: &mut HashMap<String, f64>,
    context: &ActivationContext,
) -> Result<Vec<MemoryItem>, String> {
    match context.method {
        ActivationMethod::Threshold => Ok(threshold_activation(candidates, scores, context)),
        ActivationMethod::WinnerTakesAll => {
            Ok(top_k_activation(candidates, scores, context.target_count))
        }
        ActivationMethod::Sparsity => {
            let k = ((candidates.len() as f64 * context.target_sparsity) as usize).max(1);
            Ok(top_k_activation(candidates, scores, k))
        }
        ActivationMethod::Adaptive => adaptive_activation(candidates, scores, context),
        ActivationMethod::Competitive => Ok(competitive_activation(candidates, scores, context)),
    }
}

fn threshold_activation(
    candidates: &[MemoryItem],
    scores: &HashMap<String, f64>,
    context: &ActivationContext,
) -> Vec<MemoryItem> {
    let threshold = context.quality_threshold;
    let mut activated = Vec::new();

    for memory in candidates {
        if score_of(scores, &memory.id) >= threshold {
            activated.push(memory.clone());
        }
        if activated.len() >= context.target_count {
            break;
        }
    }
    activated
}

fn top_k_activation(
    candidates: &[MemoryItem],
    scores: &HashMap<String, f64>,
    k: usize,
) -> Vec<MemoryItem> {
    let mut sorted: Vec<&MemoryItem> = candidates.iter().collect();
    sorted.sort_by(|a, b| score_of(scores, &b.id).total_cmp(&score_of(scores, &a.id)));
    sorted.into_iter().take(k).cloned().collect()
}

fn adaptive_activation(
    candidates: &[MemoryItem],
    scores: &HashMap<String, f64>,
    context: &ActivationContext,
) -> Result<Vec<MemoryItem>, String> {
    if candidates.is_empty() {
        return Ok(vec![]);
    }

    let values: Vec<f64> = candidates.iter().map(|m| score_of(scores, &m.id)).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|score| (score - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();

    let threshold = if std_dev > 0.0 {
        mean + 0.5 * std_dev
    } else {
        mean * 0.8
    };

    Ok(candidates
        .iter()
        .filter(|m| score_of(scores, &m.id) >= threshold)
        .take(context.target_count)
        .cloned()
        .collect())
}

fn competitive_activation(
    candidates: &[MemoryItem],
    scores: &mut HashMap<String, f64>,
    context: &ActivationContext,
) -> Vec<MemoryItem> {
    let mut remaining: Vec<&MemoryItem> = candidates.iter().collect();
    let mut activated = Vec::new();
    let mut remaining_budget = context.budget;

    // Re-rank each round: inhibition must demote same-signature competitors
    // before they compete for the remaining budget.
    while activated.len() < context.target_count && !remaining.is_empty() {
        let best_index = remaining
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| score_of(scores, &a.id).total_cmp(&score_of(scores, &b.id)))
            .map(|(index, _)| index)
            .unwrap_or(0);
        let memory = remaining.swap_remove(best_index);

        let score = score_of(scores, &memory.id);
        let cost = memory.strength * 0.05 + score * 0.02;
        if cost > remaining_budget {
            continue;
        }

        remaining_budget -= cost;
        for other in &remaining {
            if other.pattern_signature == memory.pattern_signature {
                if let Some(entry) = scores.get_mut(&other.id) {
                    *entry *= LATERAL_INHIBITION;
                }
            }
        }
        activated.push(memory.clone());
    }

    activated
}

fn score_of(scores: &HashMap<String, f64>, id: &str) -> f64 {
    scores.get(id).copied().unwrap_or(0.0)
}

/// Classify an activation outcome for telemetry
fn classify(active: &[MemoryItem], target_count: usize) -> ActivationState {
    if active.is_empty() {
        return ActivationState::Dormant;
    }
    let avg_strength = active.iter().map(|m| m.strength).sum::<f64>() / active.len() as f64;

    if active.len() <= 2 && avg_strength > 0.8 {
        ActivationState::StronglyActive
    } else if active.len() <= 5 && avg_strength > 0.5 {
        ActivationState::Active
    } else if active.len() <= target_count {
        ActivationState::WeaklyActive
    } else {
        ActivationState::Overload
    }
}

// ============================================================================
// TESTS
// ============================================================================
