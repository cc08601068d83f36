//! Storage module
//!
//! SQLite-based persistence adapter with:
//! - Row round-trip for memories, embeddings, event log, and system state
//! - Versioned migrations
//! - Health probe and consistent backups
//! - Retrying writes with exponential backoff

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use sqlite::{EventRecord, HealthReport, Persistence, PersistenceError, Result};
