//! hm9000 — the reconciliation daemon binary crate.
//!
//! Wires `hm9000-store`, `hm9000-analyzer`, `hm9000-sender`,
//! `hm9000-bus`, and `hm9000-fetcher` together behind the subcommands in
//! `main.rs`. Each subcommand is a thin caller of one component's contract;
//! no reconciliation logic lives here.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

use std::sync::Arc;

pub use config::HmConfig;
pub use error::{HmError, HmResult};

use hm9000_analyzer::{AnalyzeOutcome, Analyzer, AnalyzerConfig};
use hm9000_bus::MessageBus;
use hm9000_fetcher::{Fetcher, FetcherConfig};
use hm9000_metrics::ReconcileMetrics;
use hm9000_proto::HeartbeatEnvelope;
use hm9000_sender::{SendOutcome, Sender, SenderConfig, Subjects};
use hm9000_store::{DistributedLock, FreshnessGate, JsonKvStore, StoreView};
use tracing::{info, warn};

/// Process-wide wiring shared by every subcommand: config, the KV store, and
/// the counters every component bumps as it runs.
pub struct AppContext {
    pub config: HmConfig,
    pub store: JsonKvStore,
    pub metrics: Arc<ReconcileMetrics>,
}

impl AppContext {
    pub fn new(config: HmConfig) -> Self {
        let store = JsonKvStore::new(&config.store_path, "hm9000");
        Self {
            config,
            store,
            metrics: Arc::new(ReconcileMetrics::new()),
        }
    }

    pub fn freshness(&self) -> FreshnessGate<'_> {
        FreshnessGate::new(&self.store, self.config.freshness_ttl_secs, self.config.actual_freshness_wait_secs)
    }

    pub fn lock(&self, component: &str, holder_id: &str) -> DistributedLock<'_> {
        DistributedLock::new(&self.store, component, holder_id, self.config.lock_ttl_secs)
    }

    pub fn subjects(&self) -> Subjects {
        Subjects {
            start_subject: self.config.nats_start_subject.clone(),
            stop_subject: self.config.nats_stop_subject.clone(),
        }
    }
}

/// Current unix time. The only place this daemon reads the wall clock —
/// every component contract below takes `now` explicitly so it stays pure
/// and testable without it.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Acquire `lock`, run `body`, and release it afterward. Returns
/// `HmError::Lock` without running `body` if acquisition fails — the caller
/// should treat this as "another instance is reconciling, try again later."
pub async fn with_lock<F, Fut, T>(lock: &DistributedLock<'_>, now: i64, body: F) -> HmResult<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = HmResult<T>>,
{
    if !lock.acquire(now) {
        return Err(HmError::Lock("could not acquire distributed lock".to_string()));
    }
    let result = body().await;
    lock.release();
    result
}

// ─── fetch_desired ────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct BulkCredentials {
    user: String,
    password: String,
}

/// Resolve bulk-API credentials: config wins when present, otherwise a
/// request-reply round trip on `nats_bulk_credentials_subject` per
/// `spec.md` §6 ("may be supplied by config or by request-reply").
async fn resolve_bulk_credentials(ctx: &AppContext, bus: &dyn MessageBus) -> (Option<String>, Option<String>) {
    if ctx.config.cc_username.is_some() && ctx.config.cc_password.is_some() {
        return (ctx.config.cc_username.clone(), ctx.config.cc_password.clone());
    }

    match bus.request(&ctx.config.nats_bulk_credentials_subject, b"{}").await {
        Ok(payload) => match serde_json::from_slice::<BulkCredentials>(&payload) {
            Ok(creds) => (Some(creds.user), Some(creds.password)),
            Err(e) => {
                warn!(error = %e, "malformed bulk credentials reply, falling back to config");
                (ctx.config.cc_username.clone(), ctx.config.cc_password.clone())
            }
        },
        Err(e) => {
            warn!(error = %e, "bulk credentials request-reply failed, falling back to config");
            (ctx.config.cc_username.clone(), ctx.config.cc_password.clone())
        }
    }
}

pub async fn run_fetch(ctx: &AppContext, bus: &dyn MessageBus) -> HmResult<usize> {
    let now = unix_now();
    let (username, password) = resolve_bulk_credentials(ctx, bus).await;
    let fetcher = Fetcher::new(FetcherConfig {
        cc_base_url: ctx.config.cc_base_url.clone(),
        username,
        password,
        batch_size: ctx.config.cc_bulk_batch_size,
        timeout_secs: 30,
    });
    let freshness = ctx.freshness();
    match fetcher.fetch_all(&ctx.store, &freshness, now).await {
        Ok(count) => {
            ctx.metrics.record_fetch(count);
            Ok(count)
        }
        Err(e) => {
            ctx.metrics.record_fetch_error();
            Err(e.into())
        }
    }
}

// ─── listen ───────────────────────────────────────────────────────────────

/// Drain one heartbeat (or DEA advertisement) message off the bus and
/// persist it. `main` calls this in a loop for as long as the process runs.
pub async fn ingest_heartbeat_envelope(ctx: &AppContext, payload: &[u8]) -> HmResult<()> {
    let envelope: HeartbeatEnvelope = serde_json::from_slice(payload).map_err(|e| HmError::Config(format!("malformed heartbeat envelope: {e}")))?;
    let now = unix_now();
    let view = StoreView::new(&ctx.store);
    let ttl = ctx.config.heartbeat_period_secs * 3;

    view.bump_dea_presence(&envelope.dea_guid, ttl, now)?;
    for hb in &envelope.instance_heartbeats {
        view.save_heartbeat(hb, ttl, now)?;
        ctx.metrics.record_heartbeat_ingested();
    }
    ctx.freshness().bump_actual(now)?;
    Ok(())
}

pub async fn run_listen(ctx: &AppContext, bus: &dyn MessageBus) -> HmResult<()> {
    let mut heartbeats = bus.subscribe(&ctx.config.nats_heartbeat_subject).await?;
    let mut advertises = bus.subscribe(&ctx.config.nats_advertise_subject).await?;
    let view = StoreView::new(&ctx.store);

    loop {
        tokio::select! {
            msg = heartbeats.recv() => {
                match msg {
                    Some(payload) => {
                        if let Err(e) = ingest_heartbeat_envelope(ctx, &payload).await {
                            warn!(error = %e, "failed to ingest heartbeat envelope");
                        }
                    }
                    None => break,
                }
            }
            msg = advertises.recv() => {
                match msg {
                    Some(payload) => {
                        if let Ok(dea_guid) = String::from_utf8(payload) {
                            let now = unix_now();
                            view.bump_dea_presence(&dea_guid, ctx.config.heartbeat_period_secs * 3, now)?;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    Ok(())
}

// ─── analyze ──────────────────────────────────────────────────────────────

pub async fn run_analyze(ctx: &AppContext) -> HmResult<AnalyzeOutcome> {
    let now = unix_now();
    let analyzer = Analyzer::new(AnalyzerConfig {
        heartbeat_period_secs: ctx.config.heartbeat_period_secs,
        grace_period_secs: ctx.config.grace_period_secs,
        max_crashes_before_backoff: ctx.config.max_crashes_before_backoff,
        max_backoff_heartbeats: ctx.config.max_backoff_heartbeats,
        crash_count_expiration_secs: ctx.config.crash_count_expiration_secs,
    });
    let freshness = ctx.freshness();
    let outcome = analyzer.analyze(&ctx.store, &freshness, now)?;
    ctx.metrics.record_analyzer_run(outcome.starts_emitted as u64, outcome.stops_emitted as u64, 0);
    info!(starts = outcome.starts_emitted, stops = outcome.stops_emitted, "analyzer pass complete");
    Ok(outcome)
}

// ─── send ─────────────────────────────────────────────────────────────────

pub async fn run_send(ctx: &AppContext, bus: &dyn MessageBus) -> HmResult<SendOutcome> {
    let now = unix_now();
    let sender = Sender::new(SenderConfig {
        message_limit: ctx.config.sender_message_limit,
    });
    let freshness = ctx.freshness();
    let outcome = sender.send(&ctx.store, &freshness, bus, &ctx.subjects(), now).await?;
    ctx.metrics.record_sender_run(outcome.publishes as u64, outcome.deletes as u64);
    info!(publishes = outcome.publishes, deletes = outcome.deletes, "sender pass complete");
    Ok(outcome)
}

// ─── shred ────────────────────────────────────────────────────────────────

/// Best-effort orphan sweep: delete any pending start/stop/crash-count entry
/// whose app is no longer desired and has no live heartbeat. Independent of
/// the lazy-GC `StoreView::get_instance_heartbeats` already performs on
/// every read; this is a periodic deep clean, not required for correctness.
pub async fn run_shred(ctx: &AppContext) -> HmResult<usize> {
    let now = unix_now();
    let view = StoreView::new(&ctx.store);
    let desired = view.get_desired_apps(now)?;
    let heartbeats = view.get_instance_heartbeats(now)?;
    let live_app_keys: std::collections::HashSet<_> = heartbeats.iter().map(|hb| hb.app_key()).collect();

    let mut removed = 0;

    let starts = view.get_pending_starts(now)?;
    for (key, msg) in &starts {
        let app_key = hm9000_proto::AppKey::new(msg.app_guid.clone(), msg.app_version.clone());
        if !desired.contains_key(&app_key) && !live_app_keys.contains(&app_key) {
            view.delete_pending_start(key)?;
            removed += 1;
        }
    }

    let stops = view.get_pending_stops(now)?;
    let live_instance_guids: std::collections::HashSet<_> = heartbeats.iter().map(|hb| hb.instance_guid.clone()).collect();
    for (key, msg) in &stops {
        if !live_instance_guids.contains(&msg.instance_guid) {
            view.delete_pending_stop(key)?;
            removed += 1;
        }
    }

    let crash_counts = view.get_crash_counts(now)?;
    for key in crash_counts.keys() {
        let Some((app_part, _index)) = key.rsplit_once('/') else { continue };
        let Some((guid, version)) = app_part.split_once(',') else { continue };
        let app_key = hm9000_proto::AppKey::new(guid, version);
        if !desired.contains_key(&app_key) && !live_app_keys.contains(&app_key) {
            view.delete_crash_count(key)?;
            removed += 1;
        }
    }

    info!(removed, "orphan sweep complete");
    Ok(removed)
}

// ─── evacuator ────────────────────────────────────────────────────────────

/// Immediately enqueue a start for any index whose only heartbeat is
/// `EVACUATING`, without waiting for the analyzer's normal grace period —
/// the instance is about to disappear deliberately, not crash.
pub async fn run_evacuator(ctx: &AppContext) -> HmResult<usize> {
    use hm9000_analyzer::{fuse, group_heartbeats_by_app};
    use hm9000_proto::{InstanceState, PendingStart, QueueTiming};

    let now = unix_now();
    let view = StoreView::new(&ctx.store);
    let freshness = ctx.freshness();
    let (_, _, combined_fresh) = freshness.is_fresh(now);
    if !combined_fresh {
        return Err(hm9000_analyzer::AnalyzeError::StoreNotFresh("desired/actual picture is not fresh enough to evacuate".to_string()).into());
    }

    let desired_by_key = view.get_desired_apps(now)?;
    let heartbeats = view.get_instance_heartbeats(now)?;
    let heartbeats_by_key = group_heartbeats_by_app(heartbeats);
    let apps = fuse(desired_by_key, heartbeats_by_key, std::collections::HashMap::new());

    let mut emitted = 0;
    for app in apps.values() {
        if !app.is_actionably_desired() {
            continue;
        }
        for index in 0..app.number_of_desired_instances() {
            let all = app.heartbeats_at_index(index);
            let evacuating = !all.is_empty() && all.iter().all(|hb| hb.state == InstanceState::Evacuating);
            if evacuating {
                let start = PendingStart {
                    app_guid: app.key.app_guid.clone(),
                    app_version: app.key.app_version.clone(),
                    index_to_start: index,
                    timing: QueueTiming::new(now, 0),
                    priority: 1.0,
                };
                view.put_pending_start(&start, now)?;
                emitted += 1;
            }
        }
    }

    info!(emitted, "evacuator pass complete");
    Ok(emitted)
}

// ─── status snapshot (serve_api / serve_metrics) ─────────────────────────

#[derive(Debug, serde::Serialize)]
pub struct StatusSnapshot {
    pub desired_fresh: bool,
    pub actual_fresh: bool,
    pub combined_fresh: bool,
    pub desired_app_count: usize,
    pub pending_starts: usize,
    pub pending_stops: usize,
}

pub fn status_snapshot(ctx: &AppContext) -> HmResult<StatusSnapshot> {
    let now = unix_now();
    let (desired_fresh, actual_fresh, combined_fresh) = ctx.freshness().is_fresh(now);
    let view = StoreView::new(&ctx.store);
    Ok(StatusSnapshot {
        desired_fresh,
        actual_fresh,
        combined_fresh,
        desired_app_count: view.get_desired_apps(now)?.len(),
        pending_starts: view.get_pending_starts(now)?.len(),
        pending_stops: view.get_pending_stops(now)?.len(),
    })
}
