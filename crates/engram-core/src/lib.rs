//! # Engram Core
//!
//! Brain-inspired cognitive runtime: a single-process engine that ingests
//! discrete events, encodes them into content-addressed patterns, persists
//! them as strength-weighted memories in an associative graph, retrieves a
//! sparse set of relevant memories per query context, and adapts memory
//! strengths through an incremental feedback loop — no batch retraining.
//!
//! Five tightly coupled subsystems form the closed perception/consolidation
//! loop:
//!
//! - **Encoder**: deterministic event → `(Pattern, Context)` mapping
//! - **Memory Store**: cache + pattern inverted index + symmetric
//!   association graph, backed by SQLite
//! - **Sparse Router**: activates a small candidate subset under a global
//!   sparsity target with lateral inhibition and adaptive thresholding
//! - **Learning Engine**: rule-based strength deltas from feedback, access,
//!   co-occurrence, and time decay
//! - **Feedback Processor**: queues, quality-weights, and batch-applies
//!   learning deltas
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{Engine, EngineConfig, IngestionSource, RawEvent};
//!
//! let engine = Engine::new(EngineConfig::default(), None)?;
//!
//! let event = RawEvent::new()
//!     .with("error", true)
//!     .with("error_type", "validation_error");
//! let result = engine.ingest(event, IngestionSource::Api)?;
//!
//! // later: close the loop with feedback on an activated memory
//! engine.feedback().process_user_feedback(
//!     result.memory_id.as_deref().unwrap(), 0.9, None, None,
//! );
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod encoder;
pub mod engine;
pub mod feedback;
pub mod ingestion;
pub mod learning;
pub mod memory;
pub mod routing;
pub mod storage;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine & configuration
pub use config::EngineConfig;
pub use engine::{Engine, EngineStatistics};

// Encoding
pub use encoder::{
    stable_hash, Context, ContextState, EncodedEvent, Encoder, EventType, IntensityLevel, Pattern,
    PatternStats, RawEvent, RawEventSummary,
};

// Memory
pub use memory::{
    MemoryError, MemoryItem, MemoryQuery, MemoryStore, MemoryStoreStats, MemoryType, NewMemory,
    DEFAULT_DECAY_RATE,
};

// Routing
pub use routing::{
    ActivationMethod, ActivationRequest, ActivationState, RouterStats, SparseRouter,
};

// Learning
pub use learning::{
    AssociationUpdate, DecayAdjustment, FeedbackType, LearningEngine, LearningEvent,
    LearningEventType, LearningResult, LearningRule, LearningStats, RuleKind,
};

// Feedback
pub use feedback::{
    FeedbackAck, FeedbackError, FeedbackEvent, FeedbackProcessor, FeedbackQuality, FeedbackSource,
    FeedbackStats, LearningUpdate,
};

// Storage
pub use storage::{EventRecord, HealthReport, Persistence, PersistenceError};

// Vectors
pub use vector::{
    content_hash, cosine_similarity, euclidean_distance, ClusterMethod, Embedder, HashEmbedder,
    SimilarityMatch, VectorEmbedding, VectorError, VectorStore, VectorStoreStats,
};

// Ingestion
pub use ingestion::{
    EnrichMetadata, IngestFilter, IngestionCoordinator, IngestionError, IngestionResult,
    IngestionSource, IngestionStats, IngestionStatus, LowQualityFilter, PreProcessor, ValidateData,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension for the vector side store
pub const DEFAULT_VECTOR_DIMENSION: usize = 384;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ActivationMethod, ActivationRequest, Context, ContextState, Engine, EngineConfig,
        FeedbackQuality, FeedbackSource, FeedbackType, IngestionResult, IngestionSource,
        IntensityLevel, MemoryItem, MemoryQuery, MemoryStore, MemoryType, NewMemory, Pattern,
        RawEvent, SparseRouter,
    };
}
