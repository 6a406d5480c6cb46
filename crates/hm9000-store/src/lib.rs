//! Typed KV store facade for the HM9000 reconciliation core.
//!
//! Owns TTL semantics over a JSON-file-backed key-value backend, the
//! freshness gate, and the cross-process distributed lock. Read operations
//! are strongly consistent with the backend; queue writes are multi-write
//! (one round trip per set), matching spec §4.5 and §5.

#![forbid(unsafe_code)]

pub mod backend;
pub mod error;
pub mod freshness;
pub mod lock;
pub mod view;

pub use backend::JsonKvStore;
pub use error::{StoreError, StoreResult};
pub use freshness::FreshnessGate;
pub use lock::DistributedLock;
pub use view::{crash_count_key, StoreView};
