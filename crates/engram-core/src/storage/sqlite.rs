//! SQLite persistence adapter
//!
//! Append/replace KV-over-rows storage for memories, embeddings, the event
//! log, and system state. Uses separate reader/writer connections behind
//! mutexes so all methods take `&self` and the adapter is `Send + Sync`.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::memory::{MemoryItem, MemoryType};
use crate::vector::VectorEmbedding;

/// Write attempts before a failure is surfaced
const WRITE_ATTEMPTS: u32 = 3;

/// Initial backoff between write retries
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Persistence error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Row payload serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Persistence result type
pub type Result<T> = std::result::Result<T, PersistenceError>;

// ============================================================================
// ROW TYPES
// ============================================================================

/// One row of the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Monotonic sequence number
    pub seq: i64,
    /// Event type tag
    pub event_type: String,
    /// Full event payload
    pub event_data: Value,
    /// When the event was logged
    pub timestamp: DateTime<Utc>,
    /// Originating component
    pub source: String,
}

/// Health probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Whether the database answered the probe
    pub connected: bool,
    /// Current schema version
    pub schema_version: u32,
    /// Whether all expected tables are present
    pub schema_ok: bool,
    /// Stored memory rows
    pub memory_count: i64,
    /// Stored event rows
    pub event_count: i64,
    /// Stored embedding rows
    pub embedding_count: i64,
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// SQLite-backed persistence adapter
pub struct Persistence {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Persistence {
    /// Apply performance PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at the given path
    ///
    /// With no path, uses the platform data directory.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("ai", "engram", "core").ok_or_else(|| {
                    PersistenceError::Init("Could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        info!("Persistence opened at {}", path.display());

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Open an in-memory database (shared between reader and writer)
    ///
    /// Intended for tests and ephemeral engines.
    pub fn open_ephemeral() -> Result<Self> {
        // Shared-cache URI so both connections see the same in-memory DB.
        let uri = format!(
            "file:engram-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let writer_conn = Connection::open_with_flags(&uri, flags)?;
        super::migrations::apply_migrations(&writer_conn)?;
        let reader_conn = Connection::open_with_flags(&uri, flags)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Run a write with bounded exponential-backoff retries
    fn with_write_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| PersistenceError::Init("Writer lock poisoned".to_string()))?;

        let mut delay = RETRY_BACKOFF;
        let mut attempt = 1;
        loop {
            match op(&writer) {
                Ok(value) => return Ok(value),
                Err(error) if attempt < WRITE_ATTEMPTS => {
                    warn!("Write attempt {attempt} failed, retrying: {error}");
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Run a read on the reader connection
    fn with_read<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .reader
            .lock()
            .map_err(|_| PersistenceError::Init("Reader lock poisoned".to_string()))?;
        op(&conn)
    }

    // ========================================================================
    // MEMORIES
    // ========================================================================

    /// Insert or replace a memory row
    pub fn store_memory(&self, item: &MemoryItem) -> Result<()> {
        let content = serde_json::to_string(&item.content)?;
        let context = serde_json::to_string(&item.context)?;
        let associations = serde_json::to_string(&item.associations)?;
        let tags = serde_json::to_string(&item.tags)?;

        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO memories (
                    id, pattern_signature, memory_type, content, context,
                    strength, access_count, last_accessed, created_at,
                    associations, tags, confidence, decay_rate, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    item.id,
                    item.pattern_signature,
                    item.memory_type.as_str(),
                    content,
                    context,
                    item.strength,
                    item.access_count as i64,
                    item.last_accessed.to_rfc3339(),
                    item.created_at.to_rfc3339(),
                    associations,
                    tags,
                    item.confidence,
                    item.decay_rate,
                    Utc::now().to_rfc3339(),
                ],
            )
        })?;

        debug!("Stored memory {}", item.id);
        Ok(())
    }

    /// Load every memory row, newest first
    pub fn load_all_memories(&self) -> Result<Vec<MemoryItem>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, pattern_signature, memory_type, content, context,
                        strength, access_count, last_accessed, created_at,
                        associations, tags, confidence, decay_rate
                 FROM memories ORDER BY created_at DESC",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, f64>(11)?,
                    row.get::<_, f64>(12)?,
                ))
            })?;

            let mut memories = Vec::new();
            for row in rows {
                let (
                    id,
                    pattern_signature,
                    memory_type,
                    content,
                    context,
                    strength,
                    access_count,
                    last_accessed,
                    created_at,
                    associations,
                    tags,
                    confidence,
                    decay_rate,
                ) = row?;

                memories.push(MemoryItem {
                    id,
                    pattern_signature,
                    memory_type: MemoryType::parse_name(&memory_type),
                    content: serde_json::from_str(&content)?,
                    context: serde_json::from_str(&context)?,
                    strength: strength.clamp(0.0, 1.0),
                    access_count: access_count.max(0) as u64,
                    last_accessed: parse_timestamp(&last_accessed)?,
                    created_at: parse_timestamp(&created_at)?,
                    associations: serde_json::from_str(&associations)?,
                    tags: serde_json::from_str(&tags)?,
                    confidence: confidence.clamp(0.0, 1.0),
                    decay_rate,
                });
            }

            Ok(memories)
        })
    }

    /// Delete a memory row
    pub fn delete_memory(&self, memory_id: &str) -> Result<()> {
        self.with_write_retry(|conn| {
            conn.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])
        })?;
        Ok(())
    }

    // ========================================================================
    // SYSTEM STATE
    // ========================================================================

    /// Upsert a system-state value
    pub fn store_system_state(&self, key: &str, value: &Value) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO system_state (key, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![key, serialized, Utc::now().to_rfc3339()],
            )
        })?;
        Ok(())
    }

    /// Load a system-state value
    pub fn load_system_state(&self, key: &str) -> Result<Option<Value>> {
        self.with_read(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM system_state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
    }

    /// Load the entire system-state map
    pub fn all_system_state(&self) -> Result<Map<String, Value>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM system_state")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut state = Map::new();
            for row in rows {
                let (key, raw) = row?;
                state.insert(key, serde_json::from_str(&raw)?);
            }
            Ok(state)
        })
    }

    // ========================================================================
    // EVENT LOG
    // ========================================================================

    /// Append an event-log row, returning its sequence number
    pub fn log_event(&self, event_type: &str, event_data: &Value, source: &str) -> Result<i64> {
        let serialized = serde_json::to_string(event_data)?;
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO event_log (event_type, event_data, timestamp, source)
                 VALUES (?1, ?2, ?3, ?4)",
                params![event_type, serialized, Utc::now().to_rfc3339(), source],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent events, optionally filtered by type
    pub fn recent_events(&self, event_type: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, event_type, event_data, timestamp, source
                 FROM event_log
                 WHERE (?1 IS NULL OR event_type = ?1)
                 ORDER BY seq DESC LIMIT ?2",
            )?;

            let rows = stmt.query_map(params![event_type, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (seq, event_type, event_data, timestamp, source) = row?;
                events.push(EventRecord {
                    seq,
                    event_type,
                    event_data: serde_json::from_str(&event_data)?,
                    timestamp: parse_timestamp(&timestamp)?,
                    source,
                });
            }
            Ok(events)
        })
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Insert or replace an embedding row
    pub fn store_embedding(&self, embedding: &VectorEmbedding) -> Result<()> {
        let vector = serde_json::to_string(&embedding.vector)?;
        let metadata = serde_json::to_string(&embedding.metadata)?;

        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO embeddings (
                    id, content_hash, vector, metadata,
                    created_at, access_count, last_accessed
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    embedding.id,
                    embedding.content_hash,
                    vector,
                    metadata,
                    embedding.created_at.to_rfc3339(),
                    embedding.access_count as i64,
                    embedding.last_accessed.to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    /// Load every embedding row
    pub fn load_all_embeddings(&self) -> Result<Vec<VectorEmbedding>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content_hash, vector, metadata,
                        created_at, access_count, last_accessed
                 FROM embeddings",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut embeddings = Vec::new();
            for row in rows {
                let (id, content_hash, vector, metadata, created_at, access_count, last_accessed) =
                    row?;
                embeddings.push(VectorEmbedding {
                    id,
                    content_hash,
                    vector: serde_json::from_str(&vector)?,
                    metadata: serde_json::from_str(&metadata)?,
                    created_at: parse_timestamp(&created_at)?,
                    access_count: access_count.max(0) as u64,
                    last_accessed: parse_timestamp(&last_accessed)?,
                });
            }
            Ok(embeddings)
        })
    }

    /// Delete an embedding row
    pub fn delete_embedding(&self, embedding_id: &str) -> Result<()> {
        self.with_write_retry(|conn| {
            conn.execute("DELETE FROM embeddings WHERE id = ?1", params![embedding_id])
        })?;
        Ok(())
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Health probe: connectivity, schema presence, row counts
    pub fn health_check(&self) -> Result<HealthReport> {
        self.with_read(|conn| {
            let schema_version = super::migrations::get_current_version(conn)?;

            let table_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('memories', 'system_state', 'event_log', 'embeddings')",
                [],
                |row| row.get(0),
            )?;
            let schema_ok = table_count == 4;

            let memory_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
            let event_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
            let embedding_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

            Ok(HealthReport {
                connected: true,
                schema_version,
                schema_ok,
                memory_count,
                event_count,
                embedding_count,
            })
        })
    }

    /// Write a consistent snapshot of the database to `path`
    pub fn backup_to(&self, path: &std::path::Path) -> Result<()> {
        let target = path
            .to_str()
            .ok_or_else(|| PersistenceError::Init("Backup path is not UTF-8".to_string()))?
            .to_string();
        self.with_write_retry(|conn| conn.execute("VACUUM INTO ?1", params![target]))?;
        info!("Database backed up to {}", path.display());
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| PersistenceError::InvalidTimestamp(raw.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NewMemory;
    use serde_json::json;

    fn persistence() -> Persistence {
        Persistence::open_ephemeral().unwrap()
    }

    fn sample_item() -> MemoryItem {
        NewMemory {
            pattern_signature: "error:validation_error".to_string(),
            content: json!({"raw": {"error": true}}),
            context: json!({"state": "error", "intensity": "high"}),
            tags: vec!["api".to_string(), "ingested".to_string()],
            ..Default::default()
        }
        .into_item()
    }

    #[test]
    fn test_memory_roundtrip() {
        let persistence = persistence();
        let mut item = sample_item();
        item.associations.insert("other-id".to_string());

        persistence.store_memory(&item).unwrap();
        let loaded = persistence.load_all_memories().unwrap();

        assert_eq!(loaded.len(), 1);
        let restored = &loaded[0];
        assert_eq!(restored.id, item.id);
        assert_eq!(restored.pattern_signature, item.pattern_signature);
        assert_eq!(restored.content, item.content);
        assert_eq!(restored.context, item.context);
        assert_eq!(restored.strength, item.strength);
        assert_eq!(restored.associations, item.associations);
        assert_eq!(restored.tags, item.tags);
    }

    #[test]
    fn test_store_is_replace() {
        let persistence = persistence();
        let mut item = sample_item();

        persistence.store_memory(&item).unwrap();
        item.strength = 0.9;
        persistence.store_memory(&item).unwrap();

        let loaded = persistence.load_all_memories().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].strength, 0.9);
    }

    #[test]
    fn test_delete_memory() {
        let persistence = persistence();
        let item = sample_item();
        persistence.store_memory(&item).unwrap();
        persistence.delete_memory(&item.id).unwrap();
        assert!(persistence.load_all_memories().unwrap().is_empty());
    }

    #[test]
    fn test_system_state_roundtrip() {
        let persistence = persistence();
        persistence
            .store_system_state("router", &json!({"threshold": 0.2}))
            .unwrap();

        let loaded = persistence.load_system_state("router").unwrap().unwrap();
        assert_eq!(loaded["threshold"], 0.2);
        assert!(persistence.load_system_state("missing").unwrap().is_none());

        let all = persistence.all_system_state().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_event_log_ordering_and_filter() {
        let persistence = persistence();
        persistence
            .log_event("ingestion_event", &json!({"n": 1}), "api")
            .unwrap();
        persistence
            .log_event("other_event", &json!({"n": 2}), "system")
            .unwrap();
        persistence
            .log_event("ingestion_event", &json!({"n": 3}), "api")
            .unwrap();

        let all = persistence.recent_events(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].seq > all[1].seq);

        let ingestions = persistence.recent_events(Some("ingestion_event"), 10).unwrap();
        assert_eq!(ingestions.len(), 2);
        assert_eq!(ingestions[0].event_data["n"], 3);
    }

    #[test]
    fn test_embedding_roundtrip() {
        let persistence = persistence();
        let embedding = VectorEmbedding {
            id: "emb-1".to_string(),
            content_hash: "abc123".to_string(),
            vector: vec![0.1, 0.2, 0.3],
            metadata: json!({"kind": "test"}),
            created_at: Utc::now(),
            access_count: 2,
            last_accessed: Utc::now(),
        };

        persistence.store_embedding(&embedding).unwrap();
        let loaded = persistence.load_all_embeddings().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content_hash, "abc123");
        assert_eq!(loaded[0].vector, vec![0.1, 0.2, 0.3]);

        persistence.delete_embedding("emb-1").unwrap();
        assert!(persistence.load_all_embeddings().unwrap().is_empty());
    }

    #[test]
    fn test_health_check() {
        let persistence = persistence();
        persistence.store_memory(&sample_item()).unwrap();

        let health = persistence.health_check().unwrap();
        assert!(health.connected);
        assert!(health.schema_ok);
        assert_eq!(health.schema_version, 2);
        assert_eq!(health.memory_count, 1);
    }
}
