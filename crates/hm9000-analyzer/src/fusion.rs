//! AppFusion: a pure function that fuses desired records, instance
//! heartbeats, and crash counters into one `App` aggregate per key, with
//! derived per-index views built lazily on first query. No I/O.

use std::cell::OnceCell;
use std::collections::HashMap;

use hm9000_proto::{AppKey, CrashCount, DesiredApp, InstanceHeartbeat};

/// A fused, transient view of one app's desired and actual state.
pub struct App {
    pub key: AppKey,
    pub desired: Option<DesiredApp>,
    pub heartbeats: Vec<InstanceHeartbeat>,
    pub crash_counts: HashMap<u32, CrashCount>,
    heartbeats_by_index: OnceCell<HashMap<u32, Vec<InstanceHeartbeat>>>,
}

impl App {
    fn new(key: AppKey, desired: Option<DesiredApp>, heartbeats: Vec<InstanceHeartbeat>, crash_counts: HashMap<u32, CrashCount>) -> Self {
        Self {
            key,
            desired,
            heartbeats,
            crash_counts,
            heartbeats_by_index: OnceCell::new(),
        }
    }

    pub fn is_desired(&self) -> bool {
        self.desired.is_some()
    }

    pub fn is_actionably_desired(&self) -> bool {
        self.desired.as_ref().is_some_and(DesiredApp::is_actionable)
    }

    pub fn number_of_desired_instances(&self) -> u32 {
        self.desired.as_ref().map(|d| d.instance_count).unwrap_or(0)
    }

    fn heartbeats_by_index(&self) -> &HashMap<u32, Vec<InstanceHeartbeat>> {
        self.heartbeats_by_index.get_or_init(|| {
            let mut by_index: HashMap<u32, Vec<InstanceHeartbeat>> = HashMap::new();
            for hb in &self.heartbeats {
                by_index.entry(hb.instance_index).or_default().push(hb.clone());
            }
            by_index
        })
    }

    pub fn heartbeats_at_index(&self, index: u32) -> &[InstanceHeartbeat] {
        self.heartbeats_by_index().get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn live_heartbeats_at_index(&self, index: u32) -> Vec<&InstanceHeartbeat> {
        self.heartbeats_at_index(index).iter().filter(|hb| hb.is_live()).collect()
    }

    pub fn crash_count_at_index(&self, index: u32) -> u32 {
        self.crash_counts.get(&index).map(|c| c.count).unwrap_or(0)
    }

    /// Indices in `[0, instance_count)` that currently have at least one
    /// heartbeat, live or not (CRASHED/EVACUATING included) — used by the
    /// analyzer to weight start priority toward apps that have lost more of
    /// themselves.
    pub fn reporting_indices(&self) -> usize {
        let instance_count = self.number_of_desired_instances();
        (0..instance_count).filter(|&i| !self.heartbeats_at_index(i).is_empty()).count()
    }

    /// Indices with at least one live heartbeat at or beyond
    /// `instance_count` — the "extra running indices" case.
    pub fn extra_running_indices(&self) -> Vec<u32> {
        let instance_count = self.number_of_desired_instances();
        let mut indices: Vec<u32> = self
            .heartbeats_by_index()
            .keys()
            .copied()
            .filter(|&i| i >= instance_count && !self.live_heartbeats_at_index(i).is_empty())
            .collect();
        indices.sort_unstable();
        indices
    }
}

/// Fuse desired records, heartbeats, and crash counters into one `App` per
/// key present in either `desired` or `heartbeats`.
pub fn fuse(
    desired_by_key: HashMap<AppKey, DesiredApp>,
    heartbeats_by_key: HashMap<AppKey, Vec<InstanceHeartbeat>>,
    crashes_by_key: HashMap<AppKey, HashMap<u32, CrashCount>>,
) -> HashMap<AppKey, App> {
    let mut keys: std::collections::HashSet<AppKey> = desired_by_key.keys().cloned().collect();
    keys.extend(heartbeats_by_key.keys().cloned());

    let mut desired_by_key = desired_by_key;
    let mut heartbeats_by_key = heartbeats_by_key;
    let mut crashes_by_key = crashes_by_key;

    keys.into_iter()
        .map(|key| {
            let desired = desired_by_key.remove(&key);
            let heartbeats = heartbeats_by_key.remove(&key).unwrap_or_default();
            let crash_counts = crashes_by_key.remove(&key).unwrap_or_default();
            let app = App::new(key.clone(), desired, heartbeats, crash_counts);
            (key, app)
        })
        .collect()
}

/// Group a flat heartbeat list by app key, as returned by
/// `StoreView::get_instance_heartbeats`.
pub fn group_heartbeats_by_app(heartbeats: Vec<InstanceHeartbeat>) -> HashMap<AppKey, Vec<InstanceHeartbeat>> {
    let mut by_key: HashMap<AppKey, Vec<InstanceHeartbeat>> = HashMap::new();
    for hb in heartbeats {
        by_key.entry(hb.app_key()).or_default().push(hb);
    }
    by_key
}
