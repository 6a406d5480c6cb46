use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("store not fresh: {0}")]
    StoreNotFresh(String),

    #[error(transparent)]
    Store(#[from] hm9000_store::StoreError),

    #[error(transparent)]
    Bus(#[from] hm9000_bus::BusError),
}

pub type SendResult<T> = Result<T, SendError>;
