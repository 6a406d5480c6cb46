//! Freshness gate: tracks whether the desired and actual pictures are recent
//! enough to reconcile against. See spec component `FreshnessGate`.

use crate::backend::JsonKvStore;
use crate::error::StoreResult;

const DESIRED_FRESH_KEY: &str = "/desired-fresh";
const ACTUAL_FRESH_KEY: &str = "/actual-fresh";

pub struct FreshnessGate<'a> {
    backend: &'a JsonKvStore,
    freshness_ttl_secs: i64,
    actual_freshness_wait_secs: i64,
}

impl<'a> FreshnessGate<'a> {
    pub fn new(backend: &'a JsonKvStore, freshness_ttl_secs: i64, actual_freshness_wait_secs: i64) -> Self {
        Self {
            backend,
            freshness_ttl_secs,
            actual_freshness_wait_secs,
        }
    }

    pub fn bump_desired(&self, now: i64) -> StoreResult<()> {
        self.backend
            .put(DESIRED_FRESH_KEY, &now.to_string(), Some(self.freshness_ttl_secs), now)
    }

    pub fn bump_actual(&self, now: i64) -> StoreResult<()> {
        self.backend
            .put(ACTUAL_FRESH_KEY, &now.to_string(), Some(self.freshness_ttl_secs), now)
    }

    /// `(desired_fresh, actual_fresh, combined)`. Actual freshness additionally
    /// requires the stored bump timestamp to be at least
    /// `actual_freshness_wait_secs` old, proving the listener has been
    /// continuously running rather than having just started.
    pub fn is_fresh(&self, now: i64) -> (bool, bool, bool) {
        let desired_fresh = self.backend.get(DESIRED_FRESH_KEY, now).is_some();
        let actual_fresh = self
            .backend
            .get(ACTUAL_FRESH_KEY, now)
            .and_then(|raw| raw.parse::<i64>().ok())
            .is_some_and(|bumped_at| now - bumped_at >= self.actual_freshness_wait_secs);
        (desired_fresh, actual_fresh, desired_fresh && actual_fresh)
    }
}
