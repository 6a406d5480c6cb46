//! End-to-end flows across the analyzer, store, and sender crates — the
//! seam each crate's own unit tests stub out by calling `analyze`/`send` in
//! isolation. These drive both passes back to back against one store and
//! inspect what actually lands on the bus.

use std::collections::HashMap;

use hm9000_analyzer::{Analyzer, AnalyzerConfig};
use hm9000_bus::InMemoryBus;
use hm9000_proto::{InstanceState, StartMessage, StopMessage};
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

/// Missing instance: analyzer queues a start, but it isn't due yet (grace
/// period hasn't elapsed), so the very next sender pass at the same instant
/// must not publish it — only once `now` reaches `send_on` does it go out.
#[tokio::test]
async fn missing_instance_start_flows_through_to_the_bus_once_due() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now - 20).unwrap();
    gate.bump_actual(now - 20).unwrap();

    let mut apps = HashMap::new();
    apps.insert(app_key("A", "v1"), desired("A", "v1", 1));
    view.save_desired_apps(&apps, now).unwrap();

    let analyzer = Analyzer::new(analyzer_config());
    let outcome = analyzer.analyze(&store, &gate, now).unwrap();
    assert_eq!(outcome.starts_emitted, 1);

    let bus = InMemoryBus::new();
    let mut rx = bus.subscribe("hm9000.start").await.unwrap();

    // Not yet due: send_on is now + grace_period_secs.
    let sender = Sender::new(SenderConfig { message_limit: 10 });
    let immediate = sender.send(&store, &gate, &bus, &subjects(), now).await.unwrap();
    assert_eq!(immediate.publishes, 0);
    assert!(rx.try_recv().is_err());

    // Once due, the sender publishes it and the queue entry is stamped sent.
    let due_now = now + 30;
    let due = sender.send(&store, &gate, &bus, &subjects(), due_now).await.unwrap();
    assert_eq!(due.publishes, 1);

    let payload = rx.try_recv().expect("start should have been published");
    let decoded: StartMessage = serde_json::from_slice(&payload).unwrap();
    assert_eq!(decoded.app_guid, "A");
    assert_eq!(decoded.instance_index, 0);
}

/// Analyzer and sender run against the same store with a DEA that goes
/// away between passes: the analyzer's output from pass N must still be
/// re-validated against whatever the world looks like when the sender
/// actually runs, not frozen at analysis time.
#[tokio::test]
async fn sender_revalidates_against_state_that_changed_after_analysis() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now - 20).unwrap();
    gate.bump_actual(now - 20).unwrap();

    let mut apps = HashMap::new();
    apps.insert(app_key("A", "v1"), desired("A", "v1", 1));
    view.save_desired_apps(&apps, now).unwrap();
    view.bump_dea_presence("dea-1", 600, now).unwrap();
    view.save_heartbeat(&heartbeat("g0", "A", "v1", 0, "dea-1", InstanceState::Running), 600, now).unwrap();

    // App goes undesired before the sender runs its due pass.
    view.save_desired_apps(&HashMap::new(), now + 1).unwrap();

    let analyzer = Analyzer::new(analyzer_config());
    let outcome = analyzer.analyze(&store, &gate, now + 1).unwrap();
    assert_eq!(outcome.stops_emitted, 1, "undesired app should queue a stop for its live instance");

    let bus = InMemoryBus::new();
    let mut rx = bus.subscribe("hm9000.stop").await.unwrap();
    let sender = Sender::new(SenderConfig { message_limit: 10 });
    let due_now = now + 1 + 30;
    let sent = sender.send(&store, &gate, &bus, &subjects(), due_now).await.unwrap();
    assert_eq!(sent.publishes, 1);

    let payload: StopMessage = serde_json::from_slice(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(payload.instance_guid, "g0");
    assert!(!payload.is_duplicate);
}

/// A full crash/backoff/restart cycle: analyzer bumps the crash count and
/// schedules a delayed restart; the sender must hold it until `send_on`
/// and publish the exact index analyzed.
#[tokio::test]
async fn crash_backoff_restart_is_held_until_due_then_published() {
    let store = JsonKvStore::in_memory();
    let view = StoreView::new(&store);
    let gate = FreshnessGate::new(&store, 600, 10);
    let now = 1000;
    gate.bump_desired(now - 20).unwrap();
    gate.bump_actual(now - 20).unwrap();

    let mut apps = HashMap::new();
    apps.insert(app_key("A", "v1"), desired("A", "v1", 2));
    view.save_desired_apps(&apps, now).unwrap();
    view.bump_dea_presence("dea-1", 600, now).unwrap();
    view.save_heartbeat(&heartbeat("g0", "A", "v1", 0, "dea-1", InstanceState::Running), 600, now).unwrap();
    view.save_heartbeat(&heartbeat("g1", "A", "v1", 1, "dea-1", InstanceState::Crashed), 600, now).unwrap();

    let mut crashes = HashMap::new();
    crashes.insert(hm9000_store::crash_count_key(&app_key("A", "v1"), 1), hm9000_tests::crash_count("A", "v1", 1, 3, now - 100));
    view.save_crash_counts(&crashes, 3600, now).unwrap();

    let analyzer = Analyzer::new(analyzer_config());
    analyzer.analyze(&store, &gate, now).unwrap();

    let starts = view.get_pending_starts(now).unwrap();
    let start = starts.values().find(|s| s.index_to_start == 1).unwrap();
    assert_eq!(start.timing.send_on, now + 360);

    let bus = InMemoryBus::new();
    let sender = Sender::new(SenderConfig { message_limit: 10 });

    let too_early = sender.send(&store, &gate, &bus, &subjects(), now + 100).await.unwrap();
    assert_eq!(too_early.publishes, 0);
    assert_eq!(view.get_pending_starts(now + 100).unwrap().len(), 1, "not-yet-due start must survive a sender pass");

    let mut rx = bus.subscribe("hm9000.start").await.unwrap();
    let on_time = sender.send(&store, &gate, &bus, &subjects(), now + 360).await.unwrap();
    assert_eq!(on_time.publishes, 1);
    let decoded: StartMessage = serde_json::from_slice(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(decoded.instance_index, 1);
}
