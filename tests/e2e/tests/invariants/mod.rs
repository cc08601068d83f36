//! Universal invariants over generated inputs
//!
//! Exercises the properties every component must hold regardless of input
//! shape: signature form, bounded confidences and strengths, index/graph
//! consistency, access monotonicity, and feedback sign behavior.

use engram_e2e_tests::{EngineHarness, EventFactory};
use engram_core::{
    Encoder, FeedbackQuality, FeedbackSource, FeedbackType, MemoryQuery, RawEvent,
};
use serde_json::json;

/// A deterministic spread of event shapes, including degenerate ones
fn generated_events() -> Vec<RawEvent> {
    let mut events = vec![
        RawEvent::new(),
        RawEvent::new().with("error", true),
        RawEvent::new().with("error", json!(null)).with("error_type", "weird"),
        RawEvent::new().with("request", true).with("method", "GET").with("endpoint", "/a"),
        RawEvent::new().with("response", true).with("status_code", 200),
        RawEvent::new().with("response", true).with("status_code", "not-a-number"),
        RawEvent::new().with("feedback", json!({"nested": true})),
        RawEvent::new().with("learning", 1).with("training", 2),
        RawEvent::new().with("reasoning", "chain"),
        RawEvent::new().with("user", "u1").with("action", "click"),
        RawEvent::new().with("memory", true),
        RawEvent::new().with("value", json!([1, 2, 3])),
        RawEvent::new().with("blob", "x".repeat(15_000)),
        RawEvent::new().with("timestamp", "t").with("source", "s").with("type", "ty"),
    ];
    for index in 0..20 {
        events.push(
            RawEvent::new()
                .with("payload", format!("generated-{index}"))
                .with("priority", ["low", "medium", "high", "critical"][index % 4]),
        );
    }
    events
}

#[test]
fn every_encoding_has_wellformed_signature_and_confidence() {
    let encoder = Encoder::new(1000);

    for event in generated_events() {
        let encoded = encoder.encode(&event);
        let signature = &encoded.pattern.signature;

        let (prefix, discriminator) = signature
            .split_once(':')
            .unwrap_or_else(|| panic!("signature without colon: {signature}"));
        assert!(
            prefix.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
            "bad prefix in {signature}"
        );
        assert!(!discriminator.is_empty());
        assert!((0.0..=1.0).contains(&encoded.pattern.confidence));
    }
}

#[test]
fn encoding_is_deterministic() {
    let encoder = Encoder::new(1000);
    for event in generated_events() {
        let first = encoder.encode(&event);
        let second = encoder.encode(&event);
        assert_eq!(first.pattern.signature, second.pattern.signature);
        assert_eq!(first.pattern.features, second.pattern.features);
        assert_eq!(first.pattern.confidence, second.pattern.confidence);
    }
}

#[test]
fn cache_invariants_hold_after_mixed_operations() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    // a mess of stores, associations, retrievals, updates, and deletes
    let a = EventFactory::seed_memories(memory, "sig:a", 3);
    let b = EventFactory::seed_memories(memory, "sig:b", 2);
    memory.create_association(&a[0], &b[0], 0.8).unwrap();
    memory.create_association(&a[0], &a[1], 0.4).unwrap();
    memory.create_association(&b[1], &a[2], 0.6).unwrap();

    memory.update_strength(&a[0], 0.7).unwrap();
    memory.update_strength(&b[0], -0.9).unwrap();
    memory
        .retrieve("sig:a", &serde_json::Map::new())
        .unwrap();
    memory.delete(&a[1]).unwrap();

    memory.verify_invariants().unwrap();

    // strengths stayed in bounds through clamping
    for id in a.iter().chain(b.iter()) {
        if let Ok(item) = memory.get(id) {
            assert!((0.0..=1.0).contains(&item.strength));
            assert!((0.0..=1.0).contains(&item.confidence));
        }
    }
}

#[test]
fn retrieval_access_is_monotonic_and_ordered() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();
    EventFactory::seed_memories(memory, "sig:m", 5);

    let query = MemoryQuery {
        pattern_signature: Some("sig:m".to_string()),
        ..Default::default()
    };

    let mut last_counts: Vec<u64> = vec![];
    for round in 1u64..=3 {
        let results = memory.retrieve_by_query(&query).unwrap();
        assert_eq!(results.len(), 5);

        // every returned item was accessed during this retrieve
        for item in &results {
            assert!(item.access_count >= round);
        }

        // ordering respects the tie-break chain
        for pair in results.windows(2) {
            assert!(
                pair[0].strength > pair[1].strength
                    || pair[0].last_accessed >= pair[1].last_accessed
                    || pair[0].id < pair[1].id
            );
        }

        let counts: Vec<u64> = results.iter().map(|item| item.access_count).collect();
        if !last_counts.is_empty() {
            for (current, previous) in counts.iter().zip(last_counts.iter()) {
                assert!(current > previous);
            }
        }
        last_counts = counts;
    }
}

#[test]
fn feedback_sign_matches_delta_sign() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();
    let feedback = harness.engine.feedback();

    for (feedback_type, expectation) in [
        (FeedbackType::Positive, 1),
        (FeedbackType::Negative, -1),
        (FeedbackType::Neutral, 0),
    ] {
        let id = EventFactory::seed_memories(memory, "sig:f", 1).remove(0);
        let before = memory.get(&id).unwrap().strength;

        feedback.process_feedback(
            &id,
            feedback_type,
            json!({"confidence": 0.8}).as_object().cloned().unwrap(),
            FeedbackSource::System,
            FeedbackQuality::Medium,
            None,
        );
        feedback.flush().unwrap();

        let after = memory.get(&id).unwrap().strength;
        match expectation {
            1 => assert!(after >= before),
            -1 => assert!(after <= before),
            _ => assert_eq!(after, before),
        }
    }
}

#[test]
fn stored_memory_is_retrievable_by_its_signature() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let id = EventFactory::seed_memories(memory, "sig:roundtrip", 1).remove(0);
    let context = json!({"state": "normal", "intensity": "medium"})
        .as_object()
        .cloned()
        .unwrap();

    let results = memory.retrieve("sig:roundtrip", &context).unwrap();
    assert!(results.iter().any(|item| item.id == id));
}

#[test]
fn ingestion_always_returns_result_or_typed_error() {
    let harness = EngineHarness::new_temp();

    for event in generated_events() {
        let outcome = harness
            .engine
            .ingest(event, engram_core::IngestionSource::Api);
        // nothing panics; failures are typed, successes carry a pattern
        if let Ok(result) = outcome {
            assert!(!result.pattern.signature.is_empty());
        }
    }

    harness.engine.memory().verify_invariants().unwrap();
}
