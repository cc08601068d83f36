//! Journey: sparse activation behavior under the router's selection rules

use engram_e2e_tests::EventFactory;
use engram_core::{ActivationMethod, ActivationRequest, SparseRouter};

fn pool(strengths: &[f64]) -> Vec<engram_core::MemoryItem> {
    strengths
        .iter()
        .enumerate()
        .map(|(index, strength)| EventFactory::aged_memory(&format!("sig:{index}"), *strength, 0))
        .collect()
}

#[test]
fn threshold_only_passes_strong_candidate() {
    let router = SparseRouter::new(0.05, 10, 0.1);
    router.set_threshold(0.5);

    let candidates = pool(&[0.1, 0.2, 0.3, 0.4, 0.8]);
    let active = router.activate(&candidates, &ActivationRequest::default());

    assert_eq!(active.len(), 1);
    assert_eq!(active[0].strength, 0.8);
}

#[test]
fn winner_takes_all_returns_top_three_in_order() {
    let router = SparseRouter::new(0.05, 10, 0.1);
    let candidates = pool(&[0.1, 0.2, 0.3, 0.4, 0.5]);

    let active = router.activate(
        &candidates,
        &ActivationRequest {
            method: Some(ActivationMethod::WinnerTakesAll),
            target_count: Some(3),
            ..Default::default()
        },
    );

    let strengths: Vec<f64> = active.iter().map(|m| m.strength).collect();
    assert_eq!(strengths, vec![0.5, 0.4, 0.3]);
}

#[test]
fn adaptive_threshold_rises_over_dense_window() {
    let router = SparseRouter::new(0.05, 10, 0.1);
    let candidates = pool(&[0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9]);
    let request = ActivationRequest {
        method: Some(ActivationMethod::WinnerTakesAll),
        target_count: Some(3),
        ..Default::default()
    };

    let threshold_before = router.current_threshold();
    // every call activates 3/10 = 0.3, six-fold the sparsity target
    for _ in 0..100 {
        router.activate(&candidates, &request);
    }

    let stats = router.statistics();
    assert!(stats.sparsity_violations >= 1);
    assert!(stats.threshold_adjustments >= 1);
    assert!(stats.global_threshold > threshold_before);
}

#[test]
fn sparsity_invariant_holds_or_threshold_raised() {
    let router = SparseRouter::new(0.05, 10, 0.1);
    let candidates = pool(&[0.2, 0.3, 0.5, 0.6, 0.9, 0.8, 0.4, 0.1, 0.7, 0.5]);

    let mut sparsity_sum = 0.0;
    for _ in 0..100 {
        let active = router.activate(&candidates, &ActivationRequest::default());
        sparsity_sum += active.len() as f64 / candidates.len() as f64;
    }
    let mean_sparsity = sparsity_sum / 100.0;

    let stats = router.statistics();
    assert!(mean_sparsity <= 2.0 * stats.target_sparsity || stats.threshold_adjustments >= 1);
}

#[test]
fn mass_ingestion_keeps_activation_sparse() {
    let harness = engram_e2e_tests::EngineHarness::new_temp();

    // many events sharing one signature drive competition up
    for _ in 0..30 {
        harness
            .engine
            .ingest(
                EventFactory::error_event("rate_limited"),
                engram_core::IngestionSource::Api,
            )
            .unwrap();
    }

    let stats = harness.engine.statistics();
    assert_eq!(stats.router.total_activations, 30);
    // the cap is never exceeded even with 30 same-signature candidates
    assert!(stats.router.average_active_memories <= stats.router.max_active_memories as f64);

    let last = harness
        .engine
        .ingest(
            EventFactory::error_event("rate_limited"),
            engram_core::IngestionSource::Api,
        )
        .unwrap();
    assert!(last.active_memories.len() <= stats.router.max_active_memories);
}

#[test]
fn competitive_activation_diversifies_signatures() {
    let router = SparseRouter::new(0.05, 10, 0.1);
    let candidates = vec![
        EventFactory::aged_memory("sig:dup", 0.9, 0),
        EventFactory::aged_memory("sig:dup", 0.88, 0),
        EventFactory::aged_memory("sig:other", 0.6, 0),
    ];

    let active = router.activate(
        &candidates,
        &ActivationRequest {
            method: Some(ActivationMethod::Competitive),
            budget: 1.0,
            target_count: Some(2),
            ..Default::default()
        },
    );

    assert_eq!(active.len(), 2);
    let signatures: Vec<&str> = active.iter().map(|m| m.pattern_signature.as_str()).collect();
    assert!(signatures.contains(&"sig:dup"));
    assert!(signatures.contains(&"sig:other"));
}
