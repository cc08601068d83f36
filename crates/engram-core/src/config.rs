//! Engine configuration
//!
//! All tunables for the cognitive runtime in one place. Every field has a
//! sensible default; construct with `EngineConfig::default()` and override
//! what you need via struct update syntax.

use serde::{Deserialize, Serialize};

/// Configuration for the cognitive engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Base learning rate for reinforcement deltas
    pub learning_rate: f64,
    /// Forgetting rate per day for time decay
    pub forgetting_rate: f64,
    /// Target fraction of candidates that should activate
    pub target_sparsity: f64,
    /// Hard cap on activated memories per call
    pub max_active_memories: usize,
    /// Starting value of the adaptive activation threshold
    pub initial_global_threshold: f64,
    /// Feedback events per drain batch
    pub feedback_batch_size: usize,
    /// Seconds between feedback drain ticks
    pub feedback_interval_s: f64,
    /// Bounded feedback queue capacity (overflow drops oldest)
    pub feedback_queue_max: usize,
    /// Maximum cached memory items before backpressure
    pub memory_cache_max: usize,
    /// Bounded history size for learning/feedback/ingestion records
    pub history_bound: usize,
    /// Size histories are trimmed to when the bound is exceeded
    pub history_trim_to: usize,
    /// Embedding vector dimension
    pub vector_dimension: usize,
    /// Minimum cosine similarity for vector matches
    pub similarity_threshold: f64,
    /// Per-ingestion timeout in seconds
    pub ingestion_timeout_s: f64,
    /// Bounded encoder pattern registry capacity
    pub pattern_registry_max: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            forgetting_rate: 0.001,
            target_sparsity: 0.05,
            max_active_memories: 10,
            initial_global_threshold: 0.1,
            feedback_batch_size: 10,
            feedback_interval_s: 1.0,
            feedback_queue_max: 1000,
            memory_cache_max: 1_000_000,
            history_bound: 10_000,
            history_trim_to: 5_000,
            vector_dimension: 384,
            similarity_threshold: 0.7,
            ingestion_timeout_s: 30.0,
            pattern_registry_max: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.target_sparsity, 0.05);
        assert_eq!(config.feedback_batch_size, 10);
        assert_eq!(config.vector_dimension, 384);
        assert!(config.history_trim_to < config.history_bound);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"learningRate": 0.05}"#).unwrap();
        assert_eq!(config.learning_rate, 0.05);
        assert_eq!(config.forgetting_rate, 0.001);
        assert_eq!(config.feedback_queue_max, 1000);
    }
}
