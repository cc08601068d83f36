//! Journey: time decay and retention pruning

use engram_e2e_tests::{EngineHarness, EventFactory};
use engram_core::{MemoryError, NewMemory};

#[test]
fn decay_reduces_idle_memories_only() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let idle = EventFactory::aged_memory("error:stale", 0.5, 10);
    let idle_id = idle.id.clone();
    memory.store(idle).unwrap();

    let fresh = memory.create_item(NewMemory {
        pattern_signature: "error:fresh".to_string(),
        ..Default::default()
    });
    let fresh_id = fresh.id.clone();
    memory.store(fresh).unwrap();

    let decayed = memory.apply_time_decay().unwrap();
    assert_eq!(decayed, 1);

    // 10 days at the default 0.001/day rate
    assert!((memory.get(&idle_id).unwrap().strength - 0.49).abs() < 1e-9);
    assert_eq!(memory.get(&fresh_id).unwrap().strength, 0.5);
}

#[test]
fn decay_is_additive_over_split_intervals() {
    let mut split = EventFactory::aged_memory("sig:d", 0.8, 0);
    split.decay(3.0);
    split.decay(4.0);

    let mut whole = EventFactory::aged_memory("sig:d", 0.8, 0);
    whole.decay(7.0);

    assert!((split.strength - whole.strength).abs() < 1e-12);

    // zero days is the identity
    let mut unchanged = EventFactory::aged_memory("sig:d", 0.8, 0);
    unchanged.decay(0.0);
    assert_eq!(unchanged.strength, 0.8);
}

#[test]
fn decay_floors_at_zero() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let nearly_gone = EventFactory::aged_memory("error:gone", 0.003, 30);
    let id = nearly_gone.id.clone();
    memory.store(nearly_gone).unwrap();

    memory.apply_time_decay().unwrap();
    assert_eq!(memory.get(&id).unwrap().strength, 0.0);
    memory.verify_invariants().unwrap();
}

#[test]
fn pruning_removes_weak_stale_memories() {
    let harness = EngineHarness::new_temp();
    let memory = harness.engine.memory();

    let stale_weak = EventFactory::aged_memory("error:prunable", 0.01, 90);
    let stale_weak_id = stale_weak.id.clone();
    memory.store(stale_weak).unwrap();

    let stale_strong = EventFactory::aged_memory("error:keep", 0.9, 90);
    let stale_strong_id = stale_strong.id.clone();
    memory.store(stale_strong).unwrap();

    let fresh_weak = EventFactory::aged_memory("error:young", 0.01, 1);
    let fresh_weak_id = fresh_weak.id.clone();
    memory.store(fresh_weak).unwrap();

    let pruned = memory.prune(0.05, 30).unwrap();
    assert_eq!(pruned, 1);

    assert!(matches!(
        memory.get(&stale_weak_id),
        Err(MemoryError::NotFound(_))
    ));
    assert!(memory.get(&stale_strong_id).is_ok());
    assert!(memory.get(&fresh_weak_id).is_ok());
    memory.verify_invariants().unwrap();
}

#[test]
fn pruning_is_durable() {
    let harness = EngineHarness::new_temp();
    {
        let memory = harness.engine.memory();
        let stale = EventFactory::aged_memory("error:prunable", 0.01, 90);
        memory.store(stale).unwrap();
        memory.prune(0.05, 30).unwrap();
    }

    let harness = harness.reopen();
    assert_eq!(harness.engine.memory().statistics().total_memories, 0);
}

#[test]
fn learning_decay_adjustment_tracks_forgetting_curve() {
    let harness = EngineHarness::new_temp();
    let learning = harness.engine.learning();

    let adjustment = harness.engine.learning().apply_time_decay(10.0);
    assert!((adjustment.decay_factor - (-0.001_f64 * 10.0).exp()).abs() < 1e-12);

    // decay deltas are negative and deepen with idle time
    let short = learning.process_decay("m1", 5.0).strength_change;
    let long = learning.process_decay("m1", 50.0).strength_change;
    assert!(short < 0.0);
    assert!(long < short);
}
