//! Journey: ingest events, activate memories, close the feedback loop

use engram_e2e_tests::{EngineHarness, EventFactory};
use engram_core::{
    FeedbackQuality, FeedbackSource, FeedbackType, IngestionSource, IngestionStatus, MemoryQuery,
    NewMemory,
};
use serde_json::json;

#[test]
fn error_memory_reinforcement() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();
    let feedback = harness.engine.feedback();

    // two memories with the same error signature, stored directly so access
    // bookkeeping stays untouched
    let first = memory
        .store(memory.create_item(NewMemory {
            pattern_signature: "error:validation_error".to_string(),
            ..Default::default()
        }))
        .unwrap();
    let second = memory
        .store(memory.create_item(NewMemory {
            pattern_signature: "error:validation_error".to_string(),
            ..Default::default()
        }))
        .unwrap();

    // both are reachable through the pattern index
    let indexed = memory
        .peek_by_query(&MemoryQuery {
            pattern_signature: Some("error:validation_error".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(indexed.len(), 2);

    // POSITIVE feedback with confidence 1.0 on the first memory
    feedback.process_feedback(
        &first,
        FeedbackType::Positive,
        json!({"confidence": 1.0}).as_object().cloned().unwrap(),
        FeedbackSource::System,
        FeedbackQuality::High,
        None,
    );
    feedback.drain_once().unwrap();

    // 0.5 + learning_rate through the reinforcement rule
    assert!((memory.get(&first).unwrap().strength - 0.51).abs() < 1e-9);
    assert_eq!(memory.get(&second).unwrap().strength, 0.5);
}

#[test]
fn full_pipeline_ingest_twice() {
    let harness = EngineHarness::new_temp();

    let first = harness
        .engine
        .ingest(EventFactory::error_event("validation_error"), IngestionSource::Api)
        .unwrap();
    assert_eq!(first.status, IngestionStatus::Completed);
    assert_eq!(first.pattern.signature, "error:validation_error");
    assert!(first.memory_id.is_some());

    let second = harness
        .engine
        .ingest(EventFactory::error_event("validation_error"), IngestionSource::Api)
        .unwrap();
    assert_eq!(second.status, IngestionStatus::Completed);

    // the second ingestion saw both memories as candidates
    let stats = harness.engine.statistics();
    assert_eq!(stats.memory.total_memories, 2);
    assert_eq!(stats.router.total_activations, 2);
    assert_eq!(stats.ingestion.successful_ingestions, 2);

    // the event log recorded both pipeline runs
    let events = harness
        .engine
        .persistence()
        .recent_events(Some("ingestion_event"), 10)
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_data["status"], "completed");
    assert_eq!(events[0].source, "api");
}

#[test]
fn outcome_feedback_weakens_wrong_memory() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let result = harness
        .engine
        .ingest(EventFactory::request_event("POST", "/orders"), IngestionSource::Api)
        .unwrap();
    let id = result.memory_id.unwrap();
    let strength_before = memory.get(&id).unwrap().strength;

    let expected = json!({"x": 1}).as_object().cloned().unwrap();
    let actual = json!({"x": 10}).as_object().cloned().unwrap();
    let ack = harness
        .engine
        .feedback()
        .process_outcome_feedback(&id, &expected, &actual, None);
    assert_eq!(ack.feedback_type, FeedbackType::Negative);

    harness.engine.feedback().flush().unwrap();
    assert!(memory.get(&id).unwrap().strength < strength_before);
}

#[test]
fn user_feedback_loop_strengthens_useful_memory() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let result = harness
        .engine
        .ingest(EventFactory::user_action("export_report"), IngestionSource::Webhook)
        .unwrap();
    let id = result.memory_id.unwrap();
    let strength_before = memory.get(&id).unwrap().strength;

    harness
        .engine
        .feedback()
        .process_user_feedback(&id, 0.95, Some("exactly right"), None);
    harness.engine.feedback().flush().unwrap();

    assert!(memory.get(&id).unwrap().strength > strength_before);

    let stats = harness.engine.statistics();
    assert_eq!(stats.feedback.feedback_by_source.get("user"), Some(&1));
    assert!(stats.feedback.learning_updates_applied >= 1);
}

#[tokio::test]
async fn background_drain_loop_applies_feedback() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let id = memory
        .store(memory.create_item(NewMemory {
            pattern_signature: "action:test".to_string(),
            ..Default::default()
        }))
        .unwrap();

    let handle = harness.engine.start_feedback_loop();
    harness.engine.feedback().process_feedback(
        &id,
        FeedbackType::Positive,
        json!({"confidence": 1.0}).as_object().cloned().unwrap(),
        FeedbackSource::System,
        FeedbackQuality::High,
        None,
    );

    // the loop drains on its interval
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    handle.abort();

    assert!(memory.get(&id).unwrap().strength > 0.5);
}

#[test]
fn filtered_events_do_not_create_memories() {
    let harness = EngineHarness::new_temp();

    let result = harness
        .engine
        .ingest(engram_core::RawEvent::new(), IngestionSource::Stream)
        .unwrap();
    assert_eq!(result.status, IngestionStatus::Filtered);
    assert_eq!(harness.engine.statistics().memory.total_memories, 0);
}
