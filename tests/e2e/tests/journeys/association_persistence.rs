//! Journey: association symmetry, persistence round-trip, restart recovery

use engram_e2e_tests::{EngineHarness, EventFactory};
use engram_core::MemoryQuery;

#[test]
fn association_symmetry() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let ids = EventFactory::seed_memories(memory, "request:GET:/users", 2);
    memory.create_association(&ids[0], &ids[1], 0.8).unwrap();

    // the reverse edge exists
    let b = memory.get(&ids[1]).unwrap();
    assert!(b.associations.contains(&ids[0]));

    // and get_associated resolves it to the item
    let associated = memory.get_associated(&ids[0]).unwrap();
    assert_eq!(associated.len(), 1);
    assert_eq!(associated[0].id, ids[1]);

    memory.verify_invariants().unwrap();
}

#[test]
fn associations_survive_restart() {
    let harness = EngineHarness::new_temp();
    let ids = {
        let memory = harness.engine.memory();
        let ids = EventFactory::seed_memories(memory, "error:timeout", 3);
        memory.create_association(&ids[0], &ids[1], 0.8).unwrap();
        memory.create_association(&ids[0], &ids[2], 0.6).unwrap();
        ids
    };

    let harness = harness.reopen();
    let memory = harness.engine.memory();

    assert_eq!(memory.statistics().total_memories, 3);
    memory.verify_invariants().unwrap();

    let associated = memory.get_associated(&ids[0]).unwrap();
    assert_eq!(associated.len(), 2);
    for other in &ids[1..] {
        assert!(memory.get(other).unwrap().associations.contains(&ids[0]));
    }
}

#[test]
fn access_counts_survive_restart() {
    let harness = EngineHarness::new_temp();
    let id = {
        let memory = harness.engine.memory();
        let ids = EventFactory::seed_memories(memory, "action:login", 1);

        // retrieve twice, each access persists inside the critical section
        let context = serde_json::Map::new();
        memory.retrieve("action:login", &context).unwrap();
        memory.retrieve("action:login", &context).unwrap();
        ids.into_iter().next().unwrap()
    };

    let harness = harness.reopen();
    let item = harness.engine.memory().get(&id).unwrap();
    assert_eq!(item.access_count, 2);
    assert!((item.strength - 0.52).abs() < 1e-9);
}

#[test]
fn round_trip_retrieval_after_restart() {
    let harness = EngineHarness::new_temp();
    {
        let memory = harness.engine.memory();
        EventFactory::seed_memories(memory, "response:status:503", 1);
    }

    let harness = harness.reopen();
    let results = harness
        .engine
        .memory()
        .retrieve_by_query(&MemoryQuery {
            pattern_signature: Some("response:status:503".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].pattern_signature, "response:status:503");
}

#[test]
fn deleting_one_side_heals_the_graph() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let ids = EventFactory::seed_memories(memory, "error:oom", 2);
    memory.create_association(&ids[0], &ids[1], 0.9).unwrap();
    memory.delete(&ids[0]).unwrap();

    assert!(memory.get(&ids[1]).unwrap().associations.is_empty());
    memory.verify_invariants().unwrap();

    // the healed state is what persists
    let harness = harness.reopen();
    let memory = harness.engine.memory();
    assert!(memory.get(&ids[1]).unwrap().associations.is_empty());
    memory.verify_invariants().unwrap();
}

#[test]
fn engine_state_survives_restart() {
    let harness = EngineHarness::new_temp();
    harness.engine.router().set_threshold(0.33);
    harness.engine.learning().set_rates(0.05, 0.005);
    harness.engine.save_state().unwrap();

    let harness = harness.reopen();
    assert!((harness.engine.router().current_threshold() - 0.33).abs() < 1e-9);
    let (learning_rate, forgetting_rate) = harness.engine.learning().rates();
    assert!((learning_rate - 0.05).abs() < 1e-9);
    assert!((forgetting_rate - 0.005).abs() < 1e-9);
}
