//! The Analyzer: walks every fused `App` and emits `PendingStart`/
//! `PendingStop` messages with send-time and keep-alive, plus updated crash
//! counts. See spec §4.3.

use std::collections::HashMap;

use hm9000_proto::{AppKey, CrashCount, InstanceState, PendingStart, PendingStop, QueueTiming};
use hm9000_store::{crash_count_key, FreshnessGate, JsonKvStore, StoreView};

use crate::error::{AnalyzeError, AnalyzeResult};
use crate::fusion::{self, App};

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub heartbeat_period_secs: i64,
    pub grace_period_secs: i64,
    pub max_crashes_before_backoff: u32,
    pub max_backoff_heartbeats: u32,
    pub crash_count_expiration_secs: i64,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalyzeOutcome {
    pub starts_emitted: usize,
    pub stops_emitted: usize,
}

pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Run one analysis pass. Refuses to run when the store is not fresh,
    /// returning `AnalyzeError::StoreNotFresh` without touching the pending
    /// queues.
    pub fn analyze(&self, store: &JsonKvStore, freshness: &FreshnessGate<'_>, now: i64) -> AnalyzeResult<AnalyzeOutcome> {
        let (_, _, combined_fresh) = freshness.is_fresh(now);
        if !combined_fresh {
            return Err(AnalyzeError::StoreNotFresh(
                "desired/actual picture is not fresh enough to analyze".to_string(),
            ));
        }

        let view = StoreView::new(store);
        let desired_by_key = view.get_desired_apps(now)?;
        let heartbeats = view.get_instance_heartbeats(now)?;
        let heartbeats_by_key = fusion::group_heartbeats_by_app(heartbeats);

        let existing_crash_counts = view.get_crash_counts(now)?;
        let crashes_by_key = regroup_crash_counts(existing_crash_counts);

        let apps = fusion::fuse(desired_by_key, heartbeats_by_key, crashes_by_key);

        let mut next_starts: HashMap<String, PendingStart> = HashMap::new();
        let mut next_stops: HashMap<String, PendingStop> = HashMap::new();
        let mut next_crash_counts: HashMap<String, CrashCount> = HashMap::new();

        for app in apps.values() {
            let (starts, stops, crash_counts) = self.analyze_app(app, now);
            for start in starts {
                next_starts.insert(start.store_key(), start);
            }
            for stop in stops {
                next_stops.insert(stop.store_key(), stop);
            }
            for (index, count) in crash_counts {
                next_crash_counts.insert(crash_count_key(&app.key, index), count);
            }
        }

        let outcome = AnalyzeOutcome {
            starts_emitted: next_starts.len(),
            stops_emitted: next_stops.len(),
        };

        view.save_pending_starts(&next_starts, now)?;
        view.save_pending_stops(&next_stops, now)?;
        view.save_crash_counts(&next_crash_counts, self.config.crash_count_expiration_secs, now)?;

        Ok(outcome)
    }

    /// Per-app decision procedure (spec §4.3), evaluated once per fused `App`
    /// per pass.
    fn analyze_app(&self, app: &App, now: i64) -> (Vec<PendingStart>, Vec<PendingStop>, HashMap<u32, CrashCount>) {
        let mut starts = Vec::new();
        let mut stops = Vec::new();
        let mut crash_counts = app.crash_counts.clone();

        if !app.is_actionably_desired() {
            // Undesired apps: stop every live heartbeat; never start, and
            // never touch crash processing (see design note: the source's
            // "appsNotDesired" branch that created starts was dead code).
            for hb in &app.heartbeats {
                if hb.is_live() {
                    stops.push(PendingStop {
                        instance_guid: hb.instance_guid.clone(),
                        timing: QueueTiming::new(now + self.config.grace_period_secs, self.config.grace_period_secs),
                        is_duplicate: false,
                    });
                }
            }
            return (starts, stops, crash_counts);
        }

        let instance_count = app.number_of_desired_instances();
        let reporting = app.reporting_indices();
        let priority = if instance_count == 0 {
            0.0
        } else {
            (instance_count as f64 - reporting as f64) / instance_count as f64
        };

        for index in 0..instance_count {
            let live = app.live_heartbeats_at_index(index);
            let all = app.heartbeats_at_index(index);

            if live.is_empty() && all.is_empty() {
                let crash_count = app.crash_count_at_index(index);
                let delay = self.start_delay(index, crash_count);
                starts.push(PendingStart {
                    app_guid: app.key.app_guid.clone(),
                    app_version: app.key.app_version.clone(),
                    index_to_start: index,
                    timing: QueueTiming::new(now + delay, 0),
                    priority,
                });
            } else if live.len() == 1 {
                // Stable: nothing to do.
            } else if live.len() > 1 {
                let mut guids: Vec<&str> = live.iter().map(|hb| hb.instance_guid.as_str()).collect();
                guids.sort_unstable();
                let keep = guids[0];
                for hb in live.iter().filter(|hb| hb.instance_guid != keep) {
                    stops.push(PendingStop {
                        instance_guid: hb.instance_guid.clone(),
                        timing: QueueTiming::new(now + self.config.grace_period_secs, self.config.grace_period_secs),
                        is_duplicate: true,
                    });
                }
            } else if all.iter().all(|hb| hb.state == InstanceState::Crashed) {
                let old_count = app.crash_count_at_index(index);
                let new_count = bump_crash_count(&mut crash_counts, app, index, now);
                if new_count > self.config.max_crashes_before_backoff {
                    let delay = self.start_delay(index, old_count);
                    starts.push(PendingStart {
                        app_guid: app.key.app_guid.clone(),
                        app_version: app.key.app_version.clone(),
                        index_to_start: index,
                        timing: QueueTiming::new(now + delay, 0),
                        priority,
                    });
                }
            }
        }

        for index in app.extra_running_indices() {
            for hb in app.live_heartbeats_at_index(index) {
                stops.push(PendingStop {
                    instance_guid: hb.instance_guid.clone(),
                    timing: QueueTiming::new(now + self.config.grace_period_secs, self.config.grace_period_secs),
                    is_duplicate: false,
                });
            }
        }

        (starts, stops, crash_counts)
    }

    /// Restart delay for a missing/crashed index, per spec §4.3:
    /// - index 0 with a prior crash: immediate restart.
    /// - other indices with a prior crash: exponential backoff capped at
    ///   `max_backoff_heartbeats` heartbeat periods.
    /// - no prior crash: the grace period.
    fn start_delay(&self, index: u32, crash_count: u32) -> i64 {
        if crash_count == 0 {
            return self.config.grace_period_secs;
        }
        if index == 0 {
            return 0;
        }
        let exponent = (crash_count - 1).min(self.config.max_backoff_heartbeats);
        let backoff = 3 * 2i64.pow(exponent) * self.config.heartbeat_period_secs;
        backoff.min(self.config.max_backoff_heartbeats as i64 * self.config.heartbeat_period_secs)
    }
}

fn bump_crash_count(crash_counts: &mut HashMap<u32, CrashCount>, app: &App, index: u32, now: i64) -> u32 {
    let entry = crash_counts.entry(index).or_insert_with(|| CrashCount::new(app.key.app_guid.clone(), app.key.app_version.clone(), index, now));
    entry.count += 1;
    entry.count
}

fn regroup_crash_counts(flat: HashMap<String, CrashCount>) -> HashMap<AppKey, HashMap<u32, CrashCount>> {
    let mut out: HashMap<AppKey, HashMap<u32, CrashCount>> = HashMap::new();
    for count in flat.into_values() {
        let key = AppKey::new(count.app_guid.clone(), count.app_version.clone());
        out.entry(key).or_default().insert(count.instance_index, count);
    }
    out
}
