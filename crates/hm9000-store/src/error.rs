//! Store error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient: the underlying adapter could not complete the operation.
    /// Callers should surface this and let the next scheduled pass retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The desired/actual picture is not recent enough to act on.
    #[error("store not fresh: {0}")]
    StoreNotFresh(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
