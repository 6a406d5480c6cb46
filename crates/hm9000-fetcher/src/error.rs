use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unexpected HTTP status {0}")]
    Non200(u16),

    #[error("malformed bulk response: {0}")]
    BadPayload(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error(transparent)]
    Store(#[from] hm9000_store::StoreError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type FetchResult<T> = Result<T, FetchError>;
