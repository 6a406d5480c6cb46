//! Property-style checks from spec §8 that only make sense exercised across
//! several apps/indices at once — single-scenario unit tests in
//! `hm9000-analyzer`/`hm9000-sender` cover the individual rules these
//! compose.

use std::collections::HashMap;

use hm9000_analyzer::{Analyzer, AnalyzerConfig};
use hm9000_bus::InMemoryBus;
use hm9000_proto::InstanceState;
use hm9000_sender::{Sender, SenderConfig, Subjects};
use hm9000_store::{FreshnessGate, JsonKvStore, StoreView};
use hm9000_tests::{app_key, desired, heartbeat};

fn analyzer_config() -> AnalyzerConfig {
    AnalyzerConfig {
        heartbeat_period_secs: 10,
        grace_period_secs: 30,
        max_crashes_before_backoff: 3,
        max_backoff_heartbeats: 20,
        crash_count_expiration_secs: 3600,
    }
}

fn subjects() -> Subjects {
    Subjects {
        start_subject: "hm9000.start".to_string(),
        stop_subject: "hm9000.stop".to_string(),
    }
}

/// ∀ pass: pending-queue keys are unique. Ten apps each missing one
/// instance must not collide on their `PendingStart` store keys.
#[test]
fn pending_queue_keys_are_unique_across_many_apps() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now).unwrap();
    gate.bump_actual(now).unwrap();

    let mut apps = HashMap::new();
    for i in 0..10 {
        let guid = format!("app-{i}");
        apps.insert(app_key(&guid, "v1"), desired(&guid, "v1", 1));
    }
    view.save_desired_apps(&apps, now).unwrap();

    let outcome = Analyzer::new(analyzer_config()).analyze(&store, &gate, now).unwrap();
    assert_eq!(outcome.starts_emitted, 10);

    let starts = view.get_pending_starts(now).unwrap();
    assert_eq!(starts.len(), 10, "ten distinct apps must produce ten distinct queue keys");
}

/// ∀ sender pass: the number of publishes ≤ sender-message-limit, even when
/// both the start and stop queues independently exceed the cap.
#[tokio::test]
async fn publish_cap_holds_across_both_queues_combined() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now).unwrap();
    gate.bump_actual(now).unwrap();

    let mut apps = HashMap::new();
    apps.insert(app_key("starter", "v1"), desired("starter", "v1", 5));
    // "stopper" desires zero instances but has five live ones, so every
    // index is an "extra running index" and queues a stop.
    apps.insert(app_key("stopper", "v1"), desired("stopper", "v1", 0));
    view.save_desired_apps(&apps, now).unwrap();
    view.bump_dea_presence("dea-1", 600, now).unwrap();
    for i in 0..5u32 {
        view.save_heartbeat(&heartbeat(&format!("g{i}"), "stopper", "v1", i, "dea-1", InstanceState::Running), 600, now).unwrap();
    }

    Analyzer::new(analyzer_config()).analyze(&store, &gate, now).unwrap();
    let due_now = now + 30;

    let bus = InMemoryBus::new();
    let sender = Sender::new(SenderConfig { message_limit: 4 });
    let outcome = sender.send(&store, &gate, &bus, &subjects(), due_now).await.unwrap();
    assert!(outcome.publishes <= 4, "publishes must never exceed the configured cap, got {}", outcome.publishes);
}

/// Freshness gate: with actual freshness absent, neither analyzer nor
/// sender writes to the pending queues, and both refuse outright.
#[tokio::test]
async fn freshness_gate_blocks_both_analyzer_and_sender() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now).unwrap();
    // actual freshness never bumped.

    let mut apps = HashMap::new();
    apps.insert(app_key("A", "v1"), desired("A", "v1", 1));
    view.save_desired_apps(&apps, now).unwrap();

    let analyze_result = Analyzer::new(analyzer_config()).analyze(&store, &gate, now);
    assert!(analyze_result.is_err());
    assert!(view.get_pending_starts(now).unwrap().is_empty());

    let bus = InMemoryBus::new();
    let send_result = Sender::new(SenderConfig { message_limit: 10 }).send(&store, &gate, &bus, &subjects(), now).await;
    assert!(send_result.is_err());
}

/// Idempotence across crate boundaries: running analyze → send → analyze
/// again with nothing else changing reproduces the same queue state (the
/// sent-stamped start is the only thing that should differ structurally,
/// and a second analyzer pass over the same world should not re-emit a
/// second entry for the same index).
#[test]
fn analyzer_idempotent_when_rerun_against_its_own_output() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now).unwrap();
    gate.bump_actual(now).unwrap();

    let mut apps = HashMap::new();
    apps.insert(app_key("A", "v1"), desired("A", "v1", 2));
    view.save_desired_apps(&apps, now).unwrap();
    view.bump_dea_presence("dea-1", 600, now).unwrap();
    view.save_heartbeat(&heartbeat("g0", "A", "v1", 0, "dea-1", InstanceState::Running), 600, now).unwrap();

    let analyzer = Analyzer::new(analyzer_config());
    analyzer.analyze(&store, &gate, now).unwrap();
    let first = view.get_pending_starts(now).unwrap();

    analyzer.analyze(&store, &gate, now).unwrap();
    let second = view.get_pending_starts(now).unwrap();

    assert_eq!(first, second);
}
