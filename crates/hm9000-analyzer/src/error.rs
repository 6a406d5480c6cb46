use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("store not fresh: {0}")]
    StoreNotFresh(String),

    #[error(transparent)]
    Store(#[from] hm9000_store::StoreError),
}

pub type AnalyzeResult<T> = Result<T, AnalyzeError>;
