//! Typed read/write facade over the KV backend: desired apps, instance
//! heartbeats, DEA presence, pending start/stop queues, crash counters.
//!
//! Per the design notes this collapses the source's reflection-driven
//! generic save/get into two concrete typed methods per queue; there is no
//! behavioral value in keeping that generic path here.

use std::collections::HashMap;

use hm9000_proto::{AppKey, CrashCount, DesiredApp, InstanceHeartbeat, PendingStart, PendingStop};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::JsonKvStore;
use crate::error::StoreResult;

const DESIRED_PREFIX: &str = "/apps/desired/";
const ACTUAL_PREFIX: &str = "/apps/actual/";
const DEA_PRESENCE_PREFIX: &str = "/dea-presence/";
const START_PREFIX: &str = "/start/";
const STOP_PREFIX: &str = "/stop/";
const CRASH_PREFIX: &str = "/apps/crashes/";

pub struct StoreView<'a> {
    backend: &'a JsonKvStore,
}

impl<'a> StoreView<'a> {
    pub fn new(backend: &'a JsonKvStore) -> Self {
        Self { backend }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str, now: i64) -> StoreResult<Option<T>> {
        match self.backend.get(key, now) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<i64>, now: i64) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.put(key, &raw, ttl_secs, now)?;
        Ok(())
    }

    /// Replace the full contents of a keyed set: write every entry in
    /// `next`, then delete any key from `prefix` that is no longer present.
    fn replace_set<T: Serialize>(&self, prefix: &str, next: &HashMap<String, T>, ttl_secs: Option<i64>, now: i64) -> StoreResult<()> {
        let existing: Vec<String> = self.backend.list_prefix(prefix, now);
        for (suffix, value) in next {
            self.write_json(&format!("{prefix}{suffix}"), value, ttl_secs, now)?;
        }
        for suffix in existing {
            if !next.contains_key(&suffix) {
                self.backend.delete(&format!("{prefix}{suffix}"))?;
            }
        }
        Ok(())
    }

    // ─── Desired apps ─────────────────────────────────────────────────────

    pub fn get_desired_apps(&self, now: i64) -> StoreResult<HashMap<AppKey, DesiredApp>> {
        let mut out = HashMap::new();
        for suffix in self.backend.list_prefix(DESIRED_PREFIX, now) {
            if let Some(app) = self.read_json::<DesiredApp>(&format!("{DESIRED_PREFIX}{suffix}"), now)? {
                out.insert(app.app_key(), app);
            }
        }
        Ok(out)
    }

    /// Diff-sync: store every app in `apps`, delete any desired key not seen
    /// (matches the bulk fetcher's "delete any desired key not seen" pass).
    pub fn save_desired_apps(&self, apps: &HashMap<AppKey, DesiredApp>, now: i64) -> StoreResult<()> {
        let keyed: HashMap<String, DesiredApp> = apps.iter().map(|(k, v)| (k.store_key(), v.clone())).collect();
        self.replace_set(DESIRED_PREFIX, &keyed, None, now)
    }

    // ─── Actual state (heartbeats + DEA presence) ────────────────────────

    pub fn save_heartbeat(&self, hb: &InstanceHeartbeat, heartbeat_ttl_secs: i64, now: i64) -> StoreResult<()> {
        let key = format!("{ACTUAL_PREFIX}{}/{}", hb.app_key().store_key(), hb.instance_guid);
        self.write_json(&key, hb, Some(heartbeat_ttl_secs), now)
    }

    pub fn bump_dea_presence(&self, dea_guid: &str, heartbeat_ttl_secs: i64, now: i64) -> StoreResult<()> {
        self.backend
            .put(&format!("{DEA_PRESENCE_PREFIX}{dea_guid}"), dea_guid, Some(heartbeat_ttl_secs), now)
    }

    /// The actual-state read path from spec §4.5:
    /// 1. load the DEA presence set,
    /// 2. list all heartbeat nodes,
    /// 3. filter out heartbeats whose DEA has no presence record, scheduling
    ///    those for best-effort deletion,
    /// 4. return the filtered list.
    ///
    /// This lazy-GC avoids a separate sweeper for heartbeats whose owning
    /// DEA vanished without its individual record expiring yet.
    pub fn get_instance_heartbeats(&self, now: i64) -> StoreResult<Vec<InstanceHeartbeat>> {
        let live_deas: std::collections::HashSet<String> = self
            .backend
            .list_prefix(DEA_PRESENCE_PREFIX, now)
            .into_iter()
            .collect();

        let mut live = Vec::new();
        let mut stale_keys = Vec::new();
        for suffix in self.backend.list_prefix(ACTUAL_PREFIX, now) {
            let key = format!("{ACTUAL_PREFIX}{suffix}");
            let Some(hb) = self.read_json::<InstanceHeartbeat>(&key, now)? else {
                continue;
            };
            if live_deas.contains(&hb.dea_guid) {
                live.push(hb);
            } else {
                stale_keys.push(key);
            }
        }

        for key in stale_keys {
            // Best-effort: a failure here does not affect correctness of this
            // read, only housekeeping.
            let _ = self.backend.delete(&key);
        }

        Ok(live)
    }

    // ─── Pending start queue ──────────────────────────────────────────────

    pub fn get_pending_starts(&self, now: i64) -> StoreResult<HashMap<String, PendingStart>> {
        let mut out = HashMap::new();
        for suffix in self.backend.list_prefix(START_PREFIX, now) {
            if let Some(msg) = self.read_json::<PendingStart>(&format!("{START_PREFIX}{suffix}"), now)? {
                out.insert(suffix, msg);
            }
        }
        Ok(out)
    }

    /// Replace-by-key: any prior entry whose key is absent from `next` is
    /// deleted; entries present in both are overwritten.
    pub fn save_pending_starts(&self, next: &HashMap<String, PendingStart>, now: i64) -> StoreResult<()> {
        self.replace_set(START_PREFIX, next, None, now)
    }

    pub fn put_pending_start(&self, msg: &PendingStart, now: i64) -> StoreResult<()> {
        self.write_json(&format!("{START_PREFIX}{}", msg.store_key()), msg, None, now)
    }

    pub fn delete_pending_start(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(&format!("{START_PREFIX}{key}"))
    }

    // ─── Pending stop queue ───────────────────────────────────────────────

    pub fn get_pending_stops(&self, now: i64) -> StoreResult<HashMap<String, PendingStop>> {
        let mut out = HashMap::new();
        for suffix in self.backend.list_prefix(STOP_PREFIX, now) {
            if let Some(msg) = self.read_json::<PendingStop>(&format!("{STOP_PREFIX}{suffix}"), now)? {
                out.insert(suffix, msg);
            }
        }
        Ok(out)
    }

    pub fn save_pending_stops(&self, next: &HashMap<String, PendingStop>, now: i64) -> StoreResult<()> {
        self.replace_set(STOP_PREFIX, next, None, now)
    }

    pub fn put_pending_stop(&self, msg: &PendingStop, now: i64) -> StoreResult<()> {
        self.write_json(&format!("{STOP_PREFIX}{}", msg.store_key()), msg, None, now)
    }

    pub fn delete_pending_stop(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(&format!("{STOP_PREFIX}{key}"))
    }

    // ─── Crash counts ─────────────────────────────────────────────────────

    pub fn get_crash_counts(&self, now: i64) -> StoreResult<HashMap<String, CrashCount>> {
        let mut out = HashMap::new();
        for suffix in self.backend.list_prefix(CRASH_PREFIX, now) {
            if let Some(cc) = self.read_json::<CrashCount>(&format!("{CRASH_PREFIX}{suffix}"), now)? {
                out.insert(suffix, cc);
            }
        }
        Ok(out)
    }

    /// Write every crash count with `count > 0`; any count that reached zero
    /// (or is simply absent from `next`) is deleted, letting it reset by
    /// expiry rather than overwrite.
    pub fn save_crash_counts(&self, next: &HashMap<String, CrashCount>, ttl_secs: i64, now: i64) -> StoreResult<()> {
        let positive: HashMap<String, CrashCount> = next.iter().filter(|(_, c)| c.count > 0).map(|(k, v)| (k.clone(), v.clone())).collect();
        self.replace_set(CRASH_PREFIX, &positive, Some(ttl_secs), now)
    }

    pub fn delete_crash_count(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(&format!("{CRASH_PREFIX}{key}"))
    }
}

/// Crash-count key suffix: `<app_key>/<index>`.
pub fn crash_count_key(app_key: &AppKey, index: u32) -> String {
    format!("{}/{}", app_key.store_key(), index)
}
