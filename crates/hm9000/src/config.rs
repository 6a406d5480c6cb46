//! HM9000 daemon configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HmError, HmResult};

/// Configuration for the `hm9000` reconciliation daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmConfig {
    /// Interval, in seconds, the listener/analyzer/sender assume between
    /// heartbeats when computing freshness waits and backoff delays.
    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: i64,

    /// Seconds after a start before the analyzer treats a missing heartbeat
    /// as a failure to start rather than a pending start.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: i64,

    /// Crash count beyond which the analyzer applies exponential backoff
    /// instead of immediate restart.
    #[serde(default = "default_max_crashes_before_backoff")]
    pub max_crashes_before_backoff: u32,

    /// Cap, in heartbeat periods, on the exponential backoff delay.
    #[serde(default = "default_max_backoff_heartbeats")]
    pub max_backoff_heartbeats: u32,

    /// TTL, in seconds, for the desired/actual freshness markers.
    #[serde(default = "default_freshness_ttl_secs")]
    pub freshness_ttl_secs: i64,

    /// Minimum age, in seconds, of the actual-freshness marker before the
    /// actual picture is trusted as continuously fresh.
    #[serde(default = "default_actual_freshness_wait_secs")]
    pub actual_freshness_wait_secs: i64,

    /// TTL, in seconds, for a per-index crash counter.
    #[serde(default = "default_crash_count_expiration_secs")]
    pub crash_count_expiration_secs: i64,

    /// Max messages the sender publishes in a single pass.
    #[serde(default = "default_sender_message_limit")]
    pub sender_message_limit: usize,

    /// TTL, in seconds, of a held distributed lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,

    /// Interval, in seconds, at which a held lock is renewed.
    #[serde(default = "default_lock_renew_interval_secs")]
    pub lock_renew_interval_secs: i64,

    /// Seconds of consecutive renewal failure tolerated before the process
    /// exits with code 17.
    #[serde(default = "default_lock_grace_window_secs")]
    pub lock_grace_window_secs: i64,

    /// Cloud controller base URL for the desired-state bulk API.
    #[serde(default = "default_cc_base_url")]
    pub cc_base_url: String,

    /// HTTP basic-auth username for `cc_base_url`, if not supplied over the bus.
    #[serde(default)]
    pub cc_username: Option<String>,

    /// HTTP basic-auth password for `cc_base_url`, if not supplied over the bus.
    #[serde(default)]
    pub cc_password: Option<String>,

    /// Page size for the desired-state bulk fetch.
    #[serde(default = "default_cc_bulk_batch_size")]
    pub cc_bulk_batch_size: u32,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject instance heartbeats are published on.
    #[serde(default = "default_nats_heartbeat_subject")]
    pub nats_heartbeat_subject: String,

    /// Subject DEA presence is advertised on.
    #[serde(default = "default_nats_advertise_subject")]
    pub nats_advertise_subject: String,

    /// Subject pending starts are published on.
    #[serde(default = "default_nats_start_subject")]
    pub nats_start_subject: String,

    /// Subject pending stops are published on.
    #[serde(default = "default_nats_stop_subject")]
    pub nats_stop_subject: String,

    /// Subject used for request-reply bulk-credentials lookup.
    #[serde(default = "default_nats_bulk_credentials_subject")]
    pub nats_bulk_credentials_subject: String,

    /// Directory the on-disk KV store snapshots live under.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Bind address for the metrics HTTP surface.
    #[serde(default = "default_metrics_bind_addr")]
    pub metrics_bind_addr: String,

    /// Bind address for the status API HTTP surface.
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
}

fn default_heartbeat_period_secs() -> i64 {
    10
}
fn default_grace_period_secs() -> i64 {
    30
}
fn default_max_crashes_before_backoff() -> u32 {
    3
}
fn default_max_backoff_heartbeats() -> u32 {
    20
}
fn default_freshness_ttl_secs() -> i64 {
    60
}
fn default_actual_freshness_wait_secs() -> i64 {
    10
}
fn default_crash_count_expiration_secs() -> i64 {
    3600
}
fn default_sender_message_limit() -> usize {
    50
}
fn default_lock_ttl_secs() -> i64 {
    30
}
fn default_lock_renew_interval_secs() -> i64 {
    10
}
fn default_lock_grace_window_secs() -> i64 {
    60
}
fn default_cc_base_url() -> String {
    "http://localhost:9022".to_string()
}
fn default_cc_bulk_batch_size() -> u32 {
    50
}
fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}
fn default_nats_heartbeat_subject() -> String {
    "dea.heartbeat".to_string()
}
fn default_nats_advertise_subject() -> String {
    "dea.advertise".to_string()
}
fn default_nats_start_subject() -> String {
    "hm9000.start".to_string()
}
fn default_nats_stop_subject() -> String {
    "hm9000.stop".to_string()
}
fn default_nats_bulk_credentials_subject() -> String {
    "cloudcontroller.bulk.credentials.default".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/hm9000")
}
fn default_metrics_bind_addr() -> String {
    "127.0.0.1:9023".to_string()
}
fn default_api_bind_addr() -> String {
    "127.0.0.1:9024".to_string()
}

impl HmConfig {
    pub fn load(path: &Path) -> HmResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| HmError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&data).map_err(|e| HmError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> HmResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl Default for HmConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_secs: default_heartbeat_period_secs(),
            grace_period_secs: default_grace_period_secs(),
            max_crashes_before_backoff: default_max_crashes_before_backoff(),
            max_backoff_heartbeats: default_max_backoff_heartbeats(),
            freshness_ttl_secs: default_freshness_ttl_secs(),
            actual_freshness_wait_secs: default_actual_freshness_wait_secs(),
            crash_count_expiration_secs: default_crash_count_expiration_secs(),
            sender_message_limit: default_sender_message_limit(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_renew_interval_secs: default_lock_renew_interval_secs(),
            lock_grace_window_secs: default_lock_grace_window_secs(),
            cc_base_url: default_cc_base_url(),
            cc_username: None,
            cc_password: None,
            cc_bulk_batch_size: default_cc_bulk_batch_size(),
            nats_url: default_nats_url(),
            nats_heartbeat_subject: default_nats_heartbeat_subject(),
            nats_advertise_subject: default_nats_advertise_subject(),
            nats_start_subject: default_nats_start_subject(),
            nats_stop_subject: default_nats_stop_subject(),
            nats_bulk_credentials_subject: default_nats_bulk_credentials_subject(),
            store_path: default_store_path(),
            metrics_bind_addr: default_metrics_bind_addr(),
            api_bind_addr: default_api_bind_addr(),
        }
    }
}
