//! Sharded blob storage for Strata local history.
//!
//! Every recorded file state is written once, as an immutable blob, into a
//! directory tree sharded by blob id. Blobs are never overwritten; they are
//! removed only by history cleanup or garbage collection.
//!
//! # Architecture
//!
//! - [`ShardMap`]: disperses 128-bit blob ids over up to 256 directories
//! - [`BlobStore`]: atomic put, streaming get, best-effort delete, enumeration

pub mod blob_store;
pub mod error;
pub mod shard;

pub use blob_store::BlobStore;
pub use error::{StoreError, StoreResult};
pub use shard::ShardMap;
