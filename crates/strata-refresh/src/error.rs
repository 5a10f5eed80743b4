use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid resource path: {0}")]
    Type(#[from] strata_types::TypeError),

    #[error("refresh canceled")]
    Canceled,
}

impl RefreshError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

pub type RefreshResult<T> = Result<T, RefreshError>;
