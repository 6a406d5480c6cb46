//! Reconciliation counters for HM9000.
//!
//! Provides:
//! - [`Counter`] — an atomic counter
//! - [`ReconcileMetrics`] — the counters each component bumps on a state
//!   transition it already computed
//! - [`MetricsExporter`] — Prometheus text format export

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────
// Atomic Counter
// ─────────────────────────────────────────────────────────────

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment the counter by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Read the current counter value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────
// Reconcile Metrics
// ─────────────────────────────────────────────────────────────

/// Atomic counters for the reconciliation loop's key state transitions.
///
/// All counters are thread-safe and can be shared via [`Arc`].
///
/// # Example
/// ```rust
/// # use hm9000_metrics::ReconcileMetrics;
/// # use std::sync::Arc;
/// let metrics = Arc::new(ReconcileMetrics::new());
/// metrics.starts_emitted.inc();
/// assert_eq!(metrics.starts_emitted.get(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    /// Total bulk-fetch passes completed.
    pub fetches_total: Counter,
    /// Total bulk-fetch passes that failed (auth, network, bad payload).
    pub fetch_errors: Counter,
    /// Total heartbeats ingested off the message bus.
    pub heartbeats_ingested: Counter,
    /// Total analyzer passes completed.
    pub analyzer_runs: Counter,
    /// Total pending start messages enqueued by the analyzer.
    pub starts_emitted: Counter,
    /// Total pending stop messages enqueued by the analyzer.
    pub stops_emitted: Counter,
    /// Total crash counters bumped.
    pub crashes_recorded: Counter,
    /// Total sender passes completed.
    pub sender_runs: Counter,
    /// Total messages actually published to the message bus.
    pub publishes_total: Counter,
    /// Total bus publish failures.
    pub publish_errors: Counter,
    /// Total pending messages re-validated and deleted without publishing.
    pub revalidation_deletes: Counter,
    /// Total times the combined desired/actual picture was found stale.
    pub freshness_lost: Counter,
    /// Total distributed lock acquisition failures or renewal losses.
    pub lock_losses: Counter,
}

impl ReconcileMetrics {
    /// Create a new zeroed metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed bulk-fetch pass.
    pub fn record_fetch(&self, apps_stored: usize) {
        self.fetches_total.inc();
        info!(counter = "fetches_total", value = self.fetches_total.get(), apps_stored, "bulk fetch complete");
    }

    /// Record a failed bulk-fetch pass.
    pub fn record_fetch_error(&self) {
        self.fetch_errors.inc();
        warn!(counter = "fetch_errors", value = self.fetch_errors.get(), "bulk fetch failed");
    }

    /// Record a heartbeat ingested off the bus.
    pub fn record_heartbeat_ingested(&self) {
        self.heartbeats_ingested.inc();
    }

    /// Record a completed analyzer pass, with the starts/stops/crashes it produced.
    pub fn record_analyzer_run(&self, starts: u64, stops: u64, crashes: u64) {
        self.analyzer_runs.inc();
        self.starts_emitted.add(starts);
        self.stops_emitted.add(stops);
        self.crashes_recorded.add(crashes);
        info!(
            counter = "analyzer_runs",
            value = self.analyzer_runs.get(),
            starts,
            stops,
            crashes,
            "analyzer pass complete"
        );
    }

    /// Record a completed sender pass.
    pub fn record_sender_run(&self, published: u64, deleted: u64) {
        self.sender_runs.inc();
        self.publishes_total.add(published);
        self.revalidation_deletes.add(deleted);
        info!(
            counter = "sender_runs",
            value = self.sender_runs.get(),
            published,
            deleted,
            "sender pass complete"
        );
    }

    /// Record a bus publish failure.
    pub fn record_publish_error(&self) {
        self.publish_errors.inc();
        warn!(counter = "publish_errors", value = self.publish_errors.get(), "bus publish failed");
    }

    /// Record that the combined freshness gate refused a pass.
    pub fn record_freshness_lost(&self) {
        self.freshness_lost.inc();
        warn!(counter = "freshness_lost", value = self.freshness_lost.get(), "desired/actual picture not fresh");
    }

    /// Record a distributed lock loss (acquire failure or renewal failure).
    pub fn record_lock_loss(&self) {
        self.lock_losses.inc();
        warn!(counter = "lock_losses", value = self.lock_losses.get(), "distributed lock lost");
    }
}

// ─────────────────────────────────────────────────────────────
// Metrics Exporter (Prometheus text format)
// ─────────────────────────────────────────────────────────────

/// Exports [`ReconcileMetrics`] in Prometheus text format.
pub struct MetricsExporter {
    metrics: Arc<ReconcileMetrics>,
    /// Label prefix added to all metric names (default: `hm9000`).
    prefix: String,
}

impl MetricsExporter {
    /// Create a new exporter wrapping the given metrics.
    pub fn new(metrics: Arc<ReconcileMetrics>) -> Self {
        Self {
            metrics,
            prefix: "hm9000".to_string(),
        }
    }

    /// Create with a custom metric name prefix.
    pub fn with_prefix(metrics: Arc<ReconcileMetrics>, prefix: impl Into<String>) -> Self {
        Self { metrics, prefix: prefix.into() }
    }

    /// Render all metrics as a Prometheus text format string.
    ///
    /// Each metric is rendered with `# HELP`, `# TYPE`, and value lines.
    pub fn render(&self) -> String {
        let m = &self.metrics;
        let p = &self.prefix;
        let mut out = String::new();

        self.write_counter(&mut out, p, "fetches_total", "Total bulk-fetch passes completed", m.fetches_total.get());
        self.write_counter(&mut out, p, "fetch_errors", "Total bulk-fetch passes that failed", m.fetch_errors.get());
        self.write_counter(&mut out, p, "heartbeats_ingested", "Total heartbeats ingested off the message bus", m.heartbeats_ingested.get());
        self.write_counter(&mut out, p, "analyzer_runs", "Total analyzer passes completed", m.analyzer_runs.get());
        self.write_counter(&mut out, p, "starts_emitted", "Total pending start messages enqueued", m.starts_emitted.get());
        self.write_counter(&mut out, p, "stops_emitted", "Total pending stop messages enqueued", m.stops_emitted.get());
        self.write_counter(&mut out, p, "crashes_recorded", "Total crash counters bumped", m.crashes_recorded.get());
        self.write_counter(&mut out, p, "sender_runs", "Total sender passes completed", m.sender_runs.get());
        self.write_counter(&mut out, p, "publishes_total", "Total messages published to the bus", m.publishes_total.get());
        self.write_counter(&mut out, p, "publish_errors", "Total bus publish failures", m.publish_errors.get());
        self.write_counter(&mut out, p, "revalidation_deletes", "Total pending messages deleted on re-validation", m.revalidation_deletes.get());
        self.write_counter(&mut out, p, "freshness_lost", "Total passes refused for stale freshness", m.freshness_lost.get());
        self.write_counter(&mut out, p, "lock_losses", "Total distributed lock acquisition or renewal failures", m.lock_losses.get());

        out
    }

    fn write_counter(&self, out: &mut String, prefix: &str, name: &str, help: &str, value: u64) {
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }
}

// ─────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = ReconcileMetrics::new();
        assert_eq!(m.fetches_total.get(), 0);

        m.record_fetch(12);
        m.record_fetch(8);
        assert_eq!(m.fetches_total.get(), 2);

        m.record_fetch_error();
        assert_eq!(m.fetch_errors.get(), 1);

        m.record_analyzer_run(2, 1, 0);
        assert_eq!(m.starts_emitted.get(), 2);
        assert_eq!(m.stops_emitted.get(), 1);

        m.record_sender_run(3, 1);
        assert_eq!(m.publishes_total.get(), 3);
        assert_eq!(m.revalidation_deletes.get(), 1);

        m.record_lock_loss();
        assert_eq!(m.lock_losses.get(), 1);
    }

    #[test]
    fn exporter_renders_prometheus_text_format() {
        let metrics = Arc::new(ReconcileMetrics::new());
        metrics.record_analyzer_run(4, 2, 1);

        let exporter = MetricsExporter::new(metrics);
        let output = exporter.render();

        assert!(output.contains("# HELP hm9000_starts_emitted"), "must have HELP line");
        assert!(output.contains("# TYPE hm9000_starts_emitted counter"), "must have TYPE line");
        assert!(output.contains("hm9000_starts_emitted 4"), "must have correct count");
        assert!(output.contains("hm9000_stops_emitted 2"), "must have stop count");
        assert!(output.contains("hm9000_publishes_total 0"), "zero counters must appear");
    }

    #[test]
    fn exporter_custom_prefix() {
        let metrics = Arc::new(ReconcileMetrics::new());
        let exporter = MetricsExporter::with_prefix(metrics, "myapp");
        let output = exporter.render();
        assert!(output.contains("myapp_fetches_total"), "custom prefix must be used");
        assert!(!output.contains("hm9000_fetches_total"), "default prefix must not appear");
    }
}
