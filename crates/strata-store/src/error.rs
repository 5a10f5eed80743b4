use strata_types::BlobId;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob (or its shard directory) does not exist.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// The shard count is not a power of two between 1 and 256.
    #[error("invalid shard limit {0}: must be a power of two between 1 and 256")]
    InvalidShardLimit(usize),

    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure while enumerating the store.
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
