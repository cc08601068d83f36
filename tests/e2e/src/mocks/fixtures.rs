//! Test data factory
//!
//! Generates realistic events and pre-seeded memories for test scenarios.

use chrono::{Duration, Utc};
use engram_core::{MemoryItem, MemoryStore, NewMemory, RawEvent};
use serde_json::json;

/// Factory for events and seeded memories
pub struct EventFactory;

impl EventFactory {
    /// An error event with the given error type
    pub fn error_event(error_type: &str) -> RawEvent {
        RawEvent::new()
            .with("error", true)
            .with("error_type", error_type)
            .with("message", format!("synthetic {error_type}"))
    }

    /// An API request event
    pub fn request_event(method: &str, endpoint: &str) -> RawEvent {
        RawEvent::new()
            .with("request", true)
            .with("method", method)
            .with("endpoint", endpoint)
            .with("headers", json!({"accept": "application/json"}))
    }

    /// A response event with the given status code
    pub fn response_event(status_code: i64) -> RawEvent {
        RawEvent::new()
            .with("response", true)
            .with("status_code", status_code)
    }

    /// A user action event
    pub fn user_action(action: &str) -> RawEvent {
        RawEvent::new()
            .with("user", "u-123")
            .with("action", action)
    }

    /// Store `count` memories under one signature, returning their ids
    pub fn seed_memories(store: &MemoryStore, signature: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|index| {
                let item = store.create_item(NewMemory {
                    pattern_signature: signature.to_string(),
                    content: json!({"index": index}),
                    context: json!({"state": "normal", "intensity": "medium"}),
                    ..Default::default()
                });
                store.store(item).expect("Failed to seed memory")
            })
            .collect()
    }

    /// Build (without storing) a memory with a given strength and idle age
    pub fn aged_memory(signature: &str, strength: f64, idle_days: i64) -> MemoryItem {
        let mut item = NewMemory {
            pattern_signature: signature.to_string(),
            context: json!({"state": "normal", "intensity": "medium"}),
            ..Default::default()
        }
        .into_item();
        item.strength = strength;
        item.last_accessed = Utc::now() - Duration::days(idle_days);
        item
    }
}
