//! AppFusion and the Analyzer: fuses desired state, instance heartbeats, and
//! crash counters into per-app aggregates, then walks them to produce
//! crash-aware start/stop decisions. See spec §4.2–§4.3.

#![forbid(unsafe_code)]

pub mod analyze;
pub mod error;
pub mod fusion;

pub use analyze::{AnalyzeOutcome, Analyzer, AnalyzerConfig};
pub use error::{AnalyzeError, AnalyzeResult};
pub use fusion::{fuse, group_heartbeats_by_app, App};
