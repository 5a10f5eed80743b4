use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported bucket format in {path}: expected version {expected}, found {found}")]
    FormatVersionMismatch {
        path: PathBuf,
        expected: u8,
        found: u8,
    },

    #[error("corrupt bucket file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid segment quota {0}: must be a power of two between 1 and 256")]
    InvalidSegmentQuota(usize),

    #[error("invalid stored path: {0}")]
    Type(#[from] strata_types::TypeError),
}

impl IndexError {
    /// Whether the error concerns the contents of one bucket file only,
    /// leaving other buckets usable.
    pub fn is_unreadable_bucket(&self) -> bool {
        matches!(self, Self::FormatVersionMismatch { .. } | Self::Corrupt { .. })
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
