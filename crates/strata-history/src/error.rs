use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("blob store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] strata_index::IndexError),

    #[error("invalid path: {0}")]
    Type(#[from] strata_types::TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("operation canceled")]
    Canceled,
}

impl HistoryError {
    /// Cancellation is not a failure; callers usually stop quietly.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;
