use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus publish failed: {0}")]
    PublishFailed(String),

    #[error("message bus connect failed: {0}")]
    ConnectFailed(String),

    #[error("message bus subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("message bus request failed: {0}")]
    RequestFailed(String),
}

pub type BusResult<T> = Result<T, BusError>;
