//! The Sender: dequeues due messages, re-validates them against current
//! fused state, publishes to the message bus, and deletes/requeues as
//! appropriate. See spec §4.4.

#![forbid(unsafe_code)]

pub mod error;

pub use error::{SendError, SendResult};

use std::cmp::Reverse;
use std::collections::HashMap;

use hm9000_analyzer::{fuse, group_heartbeats_by_app, App};
use hm9000_bus::MessageBus;
use hm9000_proto::{AppKey, PendingStart, PendingStop, StartMessage, StopMessage};
use hm9000_store::{FreshnessGate, JsonKvStore, StoreView};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Subjects {
    pub start_subject: String,
    pub stop_subject: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    pub message_limit: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub publishes: usize,
    pub deletes: usize,
}

pub struct Sender {
    config: SenderConfig,
}

enum StopDecision {
    DeleteOnly,
    Publish { is_duplicate: bool, app_guid: String, app_version: String, instance_index: u32 },
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        Self { config }
    }

    pub async fn send(&self, store: &JsonKvStore, freshness: &FreshnessGate<'_>, bus: &dyn MessageBus, subjects: &Subjects, now: i64) -> SendResult<SendOutcome> {
        let (_, _, combined_fresh) = freshness.is_fresh(now);
        if !combined_fresh {
            return Err(SendError::StoreNotFresh("desired/actual picture is not fresh enough to send".to_string()));
        }

        let view = StoreView::new(store);
        let starts = view.get_pending_starts(now)?;
        let stops = view.get_pending_stops(now)?;

        let desired_by_key = view.get_desired_apps(now)?;
        let heartbeats = view.get_instance_heartbeats(now)?;
        let heartbeats_by_guid: HashMap<String, hm9000_proto::InstanceHeartbeat> =
            heartbeats.iter().filter(|hb| hb.is_live()).map(|hb| (hb.instance_guid.clone(), hb.clone())).collect();
        let heartbeats_by_key = group_heartbeats_by_app(heartbeats);
        let apps = fuse(desired_by_key, heartbeats_by_key, HashMap::new());

        let mut outcome = SendOutcome::default();

        // Expired entries are dropped unconditionally and don't consume the
        // publish cap.
        let mut start_entries: Vec<(String, PendingStart)> = Vec::new();
        for (key, msg) in starts {
            if msg.timing.is_expired(now) {
                view.delete_pending_start(&key)?;
                outcome.deletes += 1;
            } else if msg.timing.is_time_to_send(now) {
                start_entries.push((key, msg));
            }
            // else: not yet due, leave untouched.
        }
        start_entries.sort_by(|(ka, a), (kb, b)| a.timing.send_on.cmp(&b.timing.send_on).then(Reverse(a.priority).partial_cmp(&Reverse(b.priority)).unwrap()).then(ka.cmp(kb)));

        let mut stop_entries: Vec<(String, PendingStop)> = Vec::new();
        for (key, msg) in stops {
            if msg.timing.is_expired(now) {
                view.delete_pending_stop(&key)?;
                outcome.deletes += 1;
            } else if msg.timing.is_time_to_send(now) {
                stop_entries.push((key, msg));
            }
        }
        stop_entries.sort_by(|(ka, a), (kb, b)| a.timing.send_on.cmp(&b.timing.send_on).then(ka.cmp(kb)));

        // Round-robin between the two queues so neither monopolizes the cap.
        let mut start_iter = start_entries.into_iter();
        let mut stop_iter = stop_entries.into_iter();
        loop {
            let mut progressed = false;
            if let Some((key, msg)) = start_iter.next() {
                progressed = true;
                self.process_start(&view, bus, subjects, &apps, &mut outcome, key, msg, now).await?;
            }
            if let Some((key, msg)) = stop_iter.next() {
                progressed = true;
                self.process_stop(&view, bus, subjects, &apps, &heartbeats_by_guid, &mut outcome, key, msg, now).await?;
            }
            if !progressed {
                break;
            }
        }

        Ok(outcome)
    }

    async fn process_start(
        &self,
        view: &StoreView<'_>,
        bus: &dyn MessageBus,
        subjects: &Subjects,
        apps: &HashMap<AppKey, App>,
        outcome: &mut SendOutcome,
        key: String,
        msg: PendingStart,
        now: i64,
    ) -> SendResult<()> {
        if !verify_start_should_be_sent(apps, &msg) {
            view.delete_pending_start(&key)?;
            outcome.deletes += 1;
            return Ok(());
        }

        if outcome.publishes >= self.config.message_limit {
            // Cap reached: leave the message queued, untouched, for the
            // next pass.
            return Ok(());
        }

        let payload = StartMessage {
            app_guid: msg.app_guid.clone(),
            app_version: msg.app_version.clone(),
            instance_index: msg.index_to_start,
        };
        hm9000_bus::publish_json(bus, &subjects.start_subject, &payload).await?;
        outcome.publishes += 1;

        match msg.timing.stamped_sent(now) {
            None => {
                view.delete_pending_start(&key)?;
                outcome.deletes += 1;
            }
            Some(timing) => {
                let mut stamped = msg;
                stamped.timing = timing;
                view.put_pending_start(&stamped, now)?;
            }
        }
        Ok(())
    }

    async fn process_stop(
        &self,
        view: &StoreView<'_>,
        bus: &dyn MessageBus,
        subjects: &Subjects,
        apps: &HashMap<AppKey, App>,
        heartbeats_by_guid: &HashMap<String, hm9000_proto::InstanceHeartbeat>,
        outcome: &mut SendOutcome,
        key: String,
        msg: PendingStop,
        now: i64,
    ) -> SendResult<()> {
        let decision = verify_stop_should_be_sent(apps, heartbeats_by_guid, &msg);
        let (app_guid, app_version, instance_index, is_duplicate) = match decision {
            StopDecision::DeleteOnly => {
                view.delete_pending_stop(&key)?;
                outcome.deletes += 1;
                return Ok(());
            }
            StopDecision::Publish { is_duplicate, app_guid, app_version, instance_index } => (app_guid, app_version, instance_index, is_duplicate),
        };

        if outcome.publishes >= self.config.message_limit {
            return Ok(());
        }

        let payload = StopMessage {
            app_guid,
            app_version,
            instance_index,
            instance_guid: msg.instance_guid.clone(),
            is_duplicate,
        };
        hm9000_bus::publish_json(bus, &subjects.stop_subject, &payload).await?;
        outcome.publishes += 1;

        match msg.timing.stamped_sent(now) {
            None => {
                view.delete_pending_stop(&key)?;
                outcome.deletes += 1;
            }
            Some(timing) => {
                let mut stamped = msg;
                stamped.timing = timing;
                view.put_pending_stop(&stamped, now)?;
            }
        }
        Ok(())
    }
}

fn verify_start_should_be_sent(apps: &HashMap<AppKey, App>, msg: &PendingStart) -> bool {
    let key = AppKey::new(msg.app_guid.clone(), msg.app_version.clone());
    let Some(app) = apps.get(&key) else {
        return false;
    };
    if !app.is_actionably_desired() {
        return false;
    }
    if msg.index_to_start >= app.number_of_desired_instances() {
        return false;
    }
    if !app.live_heartbeats_at_index(msg.index_to_start).is_empty() {
        return false;
    }
    true
}

fn verify_stop_should_be_sent(apps: &HashMap<AppKey, App>, heartbeats_by_guid: &HashMap<String, hm9000_proto::InstanceHeartbeat>, msg: &PendingStop) -> StopDecision {
    let Some(hb) = heartbeats_by_guid.get(&msg.instance_guid) else {
        return StopDecision::DeleteOnly;
    };
    let key = hb.app_key();
    let Some(app) = apps.get(&key) else {
        warn!(instance_guid = %msg.instance_guid, "live heartbeat with no fused app entry");
        return StopDecision::DeleteOnly;
    };

    if !app.is_actionably_desired() {
        return StopDecision::Publish {
            is_duplicate: false,
            app_guid: hb.app_guid.clone(),
            app_version: hb.app_version.clone(),
            instance_index: hb.instance_index,
        };
    }
    if hb.instance_index >= app.number_of_desired_instances() {
        return StopDecision::Publish {
            is_duplicate: false,
            app_guid: hb.app_guid.clone(),
            app_version: hb.app_version.clone(),
            instance_index: hb.instance_index,
        };
    }
    let duplicate = app.live_heartbeats_at_index(hb.instance_index).iter().any(|other| other.instance_guid != msg.instance_guid);
    if duplicate {
        return StopDecision::Publish {
            is_duplicate: true,
            app_guid: hb.app_guid.clone(),
            app_version: hb.app_version.clone(),
            instance_index: hb.instance_index,
        };
    }
    StopDecision::DeleteOnly
}
