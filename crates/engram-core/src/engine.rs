//! Engine - the explicit context value wiring all components
//!
//! There is no global state anywhere in the crate: persistence handles,
//! rule sets, and configuration are fields of this context, threaded
//! through the component constructors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::EngineConfig;
use crate::encoder::{Encoder, PatternStats, RawEvent};
use crate::feedback::{FeedbackProcessor, FeedbackStats};
use crate::ingestion::{
    IngestionCoordinator, IngestionResult, IngestionSource, IngestionStats,
};
use crate::learning::{LearningEngine, LearningStats};
use crate::memory::{MemoryStore, MemoryStoreStats, Result as MemoryResult};
use crate::routing::{RouterStats, SparseRouter};
use crate::storage::{HealthReport, Persistence, Result as StorageResult};
use crate::vector::{VectorStore, VectorStoreStats};

/// System-state keys used for persisted engine state
const ROUTER_STATE_KEY: &str = "router_state";
const LEARNING_STATE_KEY: &str = "learning_state";

/// Aggregate statistics snapshot across all components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    /// Memory store snapshot
    pub memory: MemoryStoreStats,
    /// Router snapshot
    pub router: RouterStats,
    /// Learning engine snapshot
    pub learning: LearningStats,
    /// Feedback processor snapshot
    pub feedback: FeedbackStats,
    /// Ingestion pipeline snapshot
    pub ingestion: IngestionStats,
    /// Vector store snapshot
    pub vectors: VectorStoreStats,
    /// Encoder pattern registry snapshot
    pub encoder: PatternStats,
}

/// The cognitive engine
///
/// Owns every subsystem and re-exposes the pipeline entry points. All
/// component handles are `Arc`s, so the engine itself is cheap to share
/// behind one.
pub struct Engine {
    config: EngineConfig,
    persistence: Arc<Persistence>,
    encoder: Arc<Encoder>,
    memory: Arc<MemoryStore>,
    router: Arc<SparseRouter>,
    learning: Arc<LearningEngine>,
    feedback: Arc<FeedbackProcessor>,
    vectors: Arc<VectorStore>,
    coordinator: IngestionCoordinator,
}

impl Engine {
    /// Open an engine backed by the given database path
    ///
    /// With no path, uses the platform data directory. Rehydrates the
    /// memory cache, the vector cache, and persisted adaptive state.
    pub fn new(config: EngineConfig, db_path: Option<PathBuf>) -> MemoryResult<Self> {
        let persistence = Arc::new(Persistence::open(db_path)?);
        Self::with_persistence(config, persistence)
    }

    /// Open an in-memory engine (nothing survives the process)
    pub fn ephemeral(config: EngineConfig) -> MemoryResult<Self> {
        let persistence = Arc::new(Persistence::open_ephemeral()?);
        Self::with_persistence(config, persistence)
    }

    fn with_persistence(config: EngineConfig, persistence: Arc<Persistence>) -> MemoryResult<Self> {
        let encoder = Arc::new(Encoder::new(config.pattern_registry_max));
        let memory = Arc::new(MemoryStore::new(
            Arc::clone(&persistence),
            config.memory_cache_max,
        ));
        let router = Arc::new(SparseRouter::new(
            config.target_sparsity,
            config.max_active_memories,
            config.initial_global_threshold,
        ));
        let learning = Arc::new(LearningEngine::new(
            config.learning_rate,
            config.forgetting_rate,
            config.history_bound,
            config.history_trim_to,
        ));
        let feedback = Arc::new(FeedbackProcessor::new(
            Arc::clone(&learning),
            Arc::clone(&memory),
            config.feedback_batch_size,
            Duration::from_secs_f64(config.feedback_interval_s),
            config.feedback_queue_max,
            config.history_bound,
            config.history_trim_to,
        ));
        let vectors = Arc::new(VectorStore::with_default_embedder(
            Arc::clone(&persistence),
            config.vector_dimension,
            config.similarity_threshold,
        ));
        let coordinator = IngestionCoordinator::new(
            Arc::clone(&encoder),
            Arc::clone(&memory),
            Arc::clone(&router),
            Arc::clone(&persistence),
            Duration::from_secs_f64(config.ingestion_timeout_s),
        );

        let engine = Self {
            config,
            persistence,
            encoder,
            memory,
            router,
            learning,
            feedback,
            vectors,
            coordinator,
        };

        let loaded = engine.memory.load()?;
        engine.vectors.load().map_err(|vector_error| match vector_error {
            crate::vector::VectorError::Persistence(persistence_error) => {
                crate::memory::MemoryError::Persistence(persistence_error)
            }
            other => crate::memory::MemoryError::InvariantViolated(other.to_string()),
        })?;
        engine.load_state()?;

        info!("Engine initialized with {loaded} memories");
        Ok(engine)
    }

    /// Ingest a single event through the full pipeline
    pub fn ingest(
        &self,
        event: RawEvent,
        source: IngestionSource,
    ) -> crate::ingestion::Result<IngestionResult> {
        self.coordinator.ingest(event, source)
    }

    /// Ingest multiple events, preserving order
    pub fn ingest_batch(
        &self,
        events: Vec<RawEvent>,
        source: IngestionSource,
    ) -> Vec<crate::ingestion::Result<IngestionResult>> {
        self.coordinator.ingest_batch(events, source)
    }

    /// Spawn the background feedback drain loop
    ///
    /// Requires a tokio runtime. Abort the handle to stop draining.
    pub fn start_feedback_loop(&self) -> tokio::task::JoinHandle<()> {
        self.feedback.spawn_drain_loop()
    }

    /// Persistence health probe
    pub fn health(&self) -> StorageResult<HealthReport> {
        self.persistence.health_check()
    }

    /// Aggregate statistics across every component
    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            memory: self.memory.statistics(),
            router: self.router.statistics(),
            learning: self.learning.statistics(),
            feedback: self.feedback.statistics(),
            ingestion: self.coordinator.statistics(),
            vectors: self.vectors.statistics(),
            encoder: self.encoder.pattern_stats(),
        }
    }

    /// Persist adaptive state (router threshold, learning rates)
    pub fn save_state(&self) -> StorageResult<()> {
        self.persistence.store_system_state(
            ROUTER_STATE_KEY,
            &json!({"globalThreshold": self.router.current_threshold()}),
        )?;

        let (learning_rate, forgetting_rate) = self.learning.rates();
        self.persistence.store_system_state(
            LEARNING_STATE_KEY,
            &json!({
                "learningRate": learning_rate,
                "forgettingRate": forgetting_rate,
            }),
        )?;
        Ok(())
    }

    /// Restore adaptive state saved by `save_state`
    pub fn load_state(&self) -> StorageResult<()> {
        if let Some(state) = self.persistence.load_system_state(ROUTER_STATE_KEY)? {
            if let Some(threshold) = state.get("globalThreshold").and_then(|v| v.as_f64()) {
                self.router.set_threshold(threshold);
            }
        }

        if let Some(state) = self.persistence.load_system_state(LEARNING_STATE_KEY)? {
            let learning_rate = state.get("learningRate").and_then(|v| v.as_f64());
            let forgetting_rate = state.get("forgettingRate").and_then(|v| v.as_f64());
            if let (Some(learning_rate), Some(forgetting_rate)) = (learning_rate, forgetting_rate) {
                self.learning.set_rates(learning_rate, forgetting_rate);
            }
        }
        Ok(())
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persistence adapter handle
    pub fn persistence(&self) -> &Arc<Persistence> {
        &self.persistence
    }

    /// Encoder handle
    pub fn encoder(&self) -> &Arc<Encoder> {
        &self.encoder
    }

    /// Memory store handle
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Sparse router handle
    pub fn router(&self) -> &Arc<SparseRouter> {
        &self.router
    }

    /// Learning engine handle
    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    /// Feedback processor handle
    pub fn feedback(&self) -> &Arc<FeedbackProcessor> {
        &self.feedback
    }

    /// Vector store handle
    pub fn vectors(&self) -> &Arc<VectorStore> {
        &self.vectors
    }

    /// Ingestion coordinator handle
    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.coordinator
    }
}
