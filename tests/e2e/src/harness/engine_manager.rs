//! Test engine manager
//!
//! Provides isolated engine instances for testing:
//! - Temporary databases that are automatically cleaned up
//! - Restart support for persistence round-trip tests
//! - Concurrent test isolation

use std::path::PathBuf;

use engram_core::{Engine, EngineConfig};
use tempfile::TempDir;

/// Manager for test engines
///
/// Creates an isolated engine per test to prevent interference. The
/// temporary database is deleted when the harness is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let harness = EngineHarness::new_temp();
/// harness.engine.ingest(event, IngestionSource::Api)?;
///
/// // simulate a process restart, same database
/// let harness = harness.reopen();
/// ```
pub struct EngineHarness {
    /// The engine under test
    pub engine: Engine,
    /// Temporary directory (kept alive to prevent premature deletion)
    _temp_dir: Option<TempDir>,
    /// Path to the database file
    db_path: PathBuf,
    /// Configuration used to build the engine
    config: EngineConfig,
}

impl EngineHarness {
    /// Create an engine on a fresh temporary database
    pub fn new_temp() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine on a fresh temporary database with a custom config
    pub fn with_config(config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test_engram.db");

        let engine = Engine::new(config.clone(), Some(db_path.clone()))
            .expect("Failed to create test engine");

        Self {
            engine,
            _temp_dir: Some(temp_dir),
            db_path,
            config,
        }
    }

    /// Drop the engine and open a fresh one on the same database
    ///
    /// Simulates a process restart: everything in-memory is rebuilt from
    /// persisted rows.
    pub fn reopen(self) -> Self {
        let Self {
            engine,
            _temp_dir,
            db_path,
            config,
        } = self;
        drop(engine);

        let engine = Engine::new(config.clone(), Some(db_path.clone()))
            .expect("Failed to reopen test engine");

        Self {
            engine,
            _temp_dir,
            db_path,
            config,
        }
    }

    /// Path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }
}
