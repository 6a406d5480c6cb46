//! JSON file-backed key-value backend with TTL semantics.
//!
//! Grounded on the JSON-snapshot-on-every-write pattern used elsewhere in
//! this workspace: data lives in memory and is flushed to a single JSON file
//! on every write. TTL is layered on top as a plain expiry timestamp column
//! next to each value — the source's KV adapter supports TTL natively, this
//! one fakes it with a stored deadline and lazy eviction on read.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    /// Unix seconds after which the entry is logically absent. `None` means
    /// no expiry.
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }
}

/// A JSON-file-backed store for a single domain of string-valued keys.
///
/// Keeps data in memory and snapshots to `{state_path}/state/{domain}.json`
/// on every write, same as a plain file-backed key-value store would; the
/// only addition is the per-entry expiry column.
pub struct JsonKvStore {
    path: Option<PathBuf>,
    data: RwLock<HashMap<String, Entry>>,
}

impl JsonKvStore {
    /// A store backed by a file under `state_path/state/{domain}.json`.
    pub fn new(state_path: &Path, domain: &str) -> Self {
        let path = state_path.join("state").join(format!("{domain}.json"));
        let data = Self::load_file(&path);
        Self {
            path: Some(path),
            data: RwLock::new(data),
        }
    }

    /// A store with no disk backing, for tests and in-process defaults.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(HashMap::new()),
        }
    }

    fn load_file(path: &Path) -> HashMap<String, Entry> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt state file, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %path.display(), "no state file, starting fresh");
                HashMap::new()
            }
        }
    }

    fn flush(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = self.data.read();
        let content = serde_json::to_string_pretty(&*snapshot)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>, now: i64) -> StoreResult<()> {
        let expires_at = ttl_secs.map(|ttl| now + ttl);
        self.data.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.flush()
    }

    pub fn get(&self, key: &str, now: i64) -> Option<String> {
        let guard = self.data.read();
        guard.get(key).filter(|e| e.is_live(now)).map(|e| e.value.clone())
    }

    pub fn delete(&self, key: &str) -> StoreResult<()> {
        self.data.write().remove(key);
        self.flush()
    }

    /// Keys (with the prefix stripped) whose value has not expired.
    pub fn list_prefix(&self, prefix: &str, now: i64) -> Vec<String> {
        self.data
            .read()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect()
    }

    /// Drop keys whose TTL has lapsed. Best-effort housekeeping, not required
    /// for correctness since reads already filter expired entries.
    pub fn sweep_expired(&self, now: i64) -> StoreResult<usize> {
        let mut guard = self.data.write();
        let before = guard.len();
        guard.retain(|_, e| e.is_live(now));
        let removed = before - guard.len();
        drop(guard);
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonKvStore::new(dir.path(), "test");
        store.put("/a", "1", None, 1000).unwrap();
        assert_eq!(store.get("/a", 1001), Some("1".to_string()));
    }

    #[test]
    fn ttl_expiry_hides_entry() {
        let store = JsonKvStore::in_memory();
        store.put("/k", "v", Some(10), 1000).unwrap();
        assert_eq!(store.get("/k", 1005), Some("v".to_string()));
        assert_eq!(store.get("/k", 1011), None);
    }

    #[test]
    fn list_prefix_filters_expired_and_strips_prefix() {
        let store = JsonKvStore::in_memory();
        store.put("/apps/actual/a/g0", "hb0", None, 1000).unwrap();
        store.put("/apps/actual/a/g1", "hb1", Some(5), 1000).unwrap();
        store.put("/other/x", "nope", None, 1000).unwrap();

        let mut keys = store.list_prefix("/apps/actual/a/", 1010);
        keys.sort();
        assert_eq!(keys, vec!["g0".to_string()]);
    }

    #[test]
    fn sweep_expired_removes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonKvStore::new(dir.path(), "sweep");
        store.put("/k1", "v", Some(5), 1000).unwrap();
        store.put("/k2", "v", None, 1000).unwrap();
        let removed = store.sweep_expired(1010).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("/k1", 1010), None);
        assert_eq!(store.get("/k2", 1010), Some("v".to_string()));
    }

    #[test]
    fn reopen_loads_prior_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonKvStore::new(dir.path(), "persist");
            store.put("/k", "v", None, 1000).unwrap();
        }
        let reopened = JsonKvStore::new(dir.path(), "persist");
        assert_eq!(reopened.get("/k", 1001), Some("v".to_string()));
    }
}
