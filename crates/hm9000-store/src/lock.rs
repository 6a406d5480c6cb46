//! Distributed lock over `/hm/locks/<component>`, used to enforce
//! at-most-one-running-instance across cooperating processes. This is a
//! lock-key invariant, not an in-process mutex — multiple processes may
//! exist, and only the KV layer can arbitrate between them.

use crate::backend::JsonKvStore;

fn lock_key(component: &str) -> String {
    format!("/hm/locks/{component}")
}

pub struct DistributedLock<'a> {
    backend: &'a JsonKvStore,
    component: String,
    holder_id: String,
    ttl_secs: i64,
}

impl<'a> DistributedLock<'a> {
    pub fn new(backend: &'a JsonKvStore, component: impl Into<String>, holder_id: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            backend,
            component: component.into(),
            holder_id: holder_id.into(),
            ttl_secs,
        }
    }

    /// Attempt to become (or remain) the lock holder. Returns `true` if this
    /// process holds the lock after the call.
    pub fn acquire(&self, now: i64) -> bool {
        let key = lock_key(&self.component);
        match self.backend.get(&key, now) {
            None => self.claim(&key, now),
            Some(holder) if holder == self.holder_id => self.claim(&key, now),
            Some(_other) => false,
        }
    }

    /// Renew an already-held lock. Returns `false` if another holder has
    /// since taken it (or the key has no record at all) — the caller should
    /// treat this as `LockLost` and exit.
    pub fn renew(&self, now: i64) -> bool {
        let key = lock_key(&self.component);
        match self.backend.get(&key, now) {
            Some(holder) if holder == self.holder_id => self.claim(&key, now),
            _ => false,
        }
    }

    fn claim(&self, key: &str, now: i64) -> bool {
        self.backend.put(key, &self.holder_id, Some(self.ttl_secs), now).is_ok()
    }

    pub fn release(&self) {
        let _ = self.backend.delete(&lock_key(&self.component));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_caller_acquires_and_can_renew() {
        let backend = JsonKvStore::in_memory();
        let lock = DistributedLock::new(&backend, "analyzer", "proc-1", 10);
        assert!(lock.acquire(1000));
        assert!(lock.renew(1005));
    }

    #[test]
    fn second_caller_cannot_acquire_while_held() {
        let backend = JsonKvStore::in_memory();
        let a = DistributedLock::new(&backend, "analyzer", "proc-a", 10);
        let b = DistributedLock::new(&backend, "analyzer", "proc-b", 10);
        assert!(a.acquire(1000));
        assert!(!b.acquire(1001));
    }

    #[test]
    fn lock_is_acquirable_by_another_after_ttl_expiry() {
        let backend = JsonKvStore::in_memory();
        let a = DistributedLock::new(&backend, "analyzer", "proc-a", 10);
        let b = DistributedLock::new(&backend, "analyzer", "proc-b", 10);
        assert!(a.acquire(1000));
        assert!(b.acquire(1011));
    }

    #[test]
    fn renew_fails_once_another_holder_has_taken_it() {
        let backend = JsonKvStore::in_memory();
        let a = DistributedLock::new(&backend, "analyzer", "proc-a", 10);
        let b = DistributedLock::new(&backend, "analyzer", "proc-b", 10);
        assert!(a.acquire(1000));
        assert!(b.acquire(1011));
        assert!(!a.renew(1012));
    }
}
