//! Data model for the HM9000 reconciliation core.
//!
//! Defines the desired/actual state records, the pending message queue
//! entries, and the KV key layout shared by every component that reads from
//! or writes to the store.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

// ─── App state & package state ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppState {
    Started,
    Stopped,
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PackageState {
    Staged,
    Pending,
    Failed,
}

impl std::fmt::Display for PackageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staged => write!(f, "STAGED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ─── Instance state ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    #[default]
    Starting,
    Running,
    Crashed,
    Evacuating,
}

impl InstanceState {
    /// A heartbeat in this state counts as occupying its index.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

// ─── Desired state ────────────────────────────────────────────────────────────

/// One row of the desired-state picture, as published by the cloud controller
/// bulk API. Key: `(app_guid, app_version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredApp {
    pub app_guid: String,
    pub app_version: String,
    pub instance_count: u32,
    pub memory: u64,
    pub state: AppState,
    pub package_state: PackageState,
}

impl DesiredApp {
    /// `true` iff this app should currently be running instances.
    pub fn is_actionable(&self) -> bool {
        self.state == AppState::Started && self.package_state != PackageState::Failed
    }

    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.app_guid, &self.app_version)
    }
}

// ─── App key ──────────────────────────────────────────────────────────────────

/// `(app_guid, app_version)`, serialized in the KV layout as `"<guid>,<version>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub app_guid: String,
    pub app_version: String,
}

impl AppKey {
    pub fn new(app_guid: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_guid: app_guid.into(),
            app_version: app_version.into(),
        }
    }

    /// KV-layout string form, e.g. for `/apps/desired/<app_key>`.
    pub fn store_key(&self) -> String {
        format!("{},{}", self.app_guid, self.app_version)
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.store_key())
    }
}

// ─── Instance heartbeat ───────────────────────────────────────────────────────

/// One instance's reported state, as carried in a DEA heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeartbeat {
    pub instance_guid: String,
    pub app_guid: String,
    pub app_version: String,
    pub instance_index: u32,
    pub dea_guid: String,
    pub state: InstanceState,
}

impl InstanceHeartbeat {
    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.app_guid, &self.app_version)
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}

// ─── DEA presence ─────────────────────────────────────────────────────────────

/// Liveness oracle for a DEA. Presence is TTL-bound; StoreView reconstructs
/// this from the KV layer rather than persisting derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeaPresence {
    pub dea_guid: String,
}

// ─── Crash counting ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashCount {
    pub app_guid: String,
    pub app_version: String,
    pub instance_index: u32,
    pub count: u32,
    pub created_at: i64,
}

impl CrashCount {
    pub fn new(app_guid: impl Into<String>, app_version: impl Into<String>, instance_index: u32, now: i64) -> Self {
        Self {
            app_guid: app_guid.into(),
            app_version: app_version.into(),
            instance_index,
            count: 1,
            created_at: now,
        }
    }
}

// ─── Pending queue messages ───────────────────────────────────────────────────

/// Fields shared by every queued message, mirroring the base `QueueMessage`
/// of the source system: when it's due, when it was last sent, and how long
/// that sent stamp suppresses re-sends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueTiming {
    pub send_on: i64,
    pub sent_on: i64,
    pub keep_alive: i64,
}

impl QueueTiming {
    pub fn new(send_on: i64, keep_alive: i64) -> Self {
        Self {
            send_on,
            sent_on: 0,
            keep_alive,
        }
    }

    pub fn is_time_to_send(&self, now: i64) -> bool {
        now >= self.send_on
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.sent_on > 0 && now > self.sent_on + self.keep_alive
    }

    /// Stamp as sent, returning `None` if the message should instead be
    /// deleted outright (invariant 4: `sent_on > 0 ⇒ keep_alive > 0`).
    pub fn stamped_sent(mut self, now: i64) -> Option<Self> {
        if self.keep_alive == 0 {
            None
        } else {
            self.sent_on = now;
            Some(self)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStart {
    pub app_guid: String,
    pub app_version: String,
    pub index_to_start: u32,
    pub timing: QueueTiming,
    pub priority: f64,
}

impl PendingStart {
    /// Unique key: `(app_guid, app_version, index_to_start)`.
    pub fn store_key(&self) -> String {
        format!("{}-{}-{}", self.app_guid, self.app_version, self.index_to_start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStop {
    pub instance_guid: String,
    pub timing: QueueTiming,
    pub is_duplicate: bool,
}

impl PendingStop {
    /// Unique key: `instance_guid`.
    pub fn store_key(&self) -> String {
        self.instance_guid.clone()
    }
}

// ─── Bus payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    pub app_guid: String,
    pub app_version: String,
    pub instance_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopMessage {
    pub app_guid: String,
    pub app_version: String,
    pub instance_index: u32,
    pub instance_guid: String,
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEnvelope {
    pub dea_guid: String,
    pub instance_heartbeats: Vec<InstanceHeartbeat>,
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// An app or DEA guid must be non-empty, reasonably short, and free of
/// characters that would break the `<guid>,<version>` / `<a>-<b>-<c>` key
/// encodings used throughout the KV layout.
pub fn validate_guid(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}
