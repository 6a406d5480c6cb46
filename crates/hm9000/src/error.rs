//! Top-level error type composing each component crate's error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HmError {
    #[error("config error: {0}")]
    Config(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error(transparent)]
    Store(#[from] hm9000_store::StoreError),

    #[error(transparent)]
    Analyze(#[from] hm9000_analyzer::AnalyzeError),

    #[error(transparent)]
    Send(#[from] hm9000_sender::SendError),

    #[error(transparent)]
    Bus(#[from] hm9000_bus::BusError),

    #[error(transparent)]
    Fetch(#[from] hm9000_fetcher::FetchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HmResult<T> = Result<T, HmError>;
