//! Builder helpers shared by the `tests/*.rs` integration suites: construct
//! desired apps, heartbeats, and crash counts without repeating every field
//! at every call site.

use hm9000_proto::{AppKey, AppState, CrashCount, DesiredApp, InstanceHeartbeat, InstanceState, PackageState};

pub fn desired(guid: &str, version: &str, instance_count: u32) -> DesiredApp {
    DesiredApp {
        app_guid: guid.into(),
        app_version: version.into(),
        instance_count,
        memory: 256,
        state: AppState::Started,
        package_state: PackageState::Staged,
    }
}

pub fn heartbeat(guid: &str, app_guid: &str, app_version: &str, index: u32, dea_guid: &str, state: InstanceState) -> InstanceHeartbeat {
    InstanceHeartbeat {
        instance_guid: guid.into(),
        app_guid: app_guid.into(),
        app_version: app_version.into(),
        instance_index: index,
        dea_guid: dea_guid.into(),
        state,
    }
}

pub fn crash_count(app_guid: &str, app_version: &str, index: u32, count: u32, created_at: i64) -> CrashCount {
    let mut cc = CrashCount::new(app_guid, app_version, index, created_at);
    cc.count = count;
    cc
}

pub fn app_key(guid: &str, version: &str) -> AppKey {
    AppKey::new(guid, version)
}
