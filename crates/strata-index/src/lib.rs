//! Persistent bucket index for Strata local history.
//!
//! Index entries map a resource path to a value (for history: the path's
//! recorded states). Entries are grouped into one small binary file per
//! directory of the resource hierarchy, and only one such bucket is held
//! in memory at a time.
//!
//! # Architecture
//!
//! - [`Bucket`]: one directory's entries, lazily loaded, saved when dirty
//! - [`BucketCodec`]: value format strategy, versioned per bucket file
//! - [`BucketTree`]: path to bucket-directory mapping and tree traversal
//! - [`HistoryCodec`] / [`HistoryEntry`]: the history value format

pub mod bucket;
pub mod codec;
pub mod error;
pub mod history;
pub mod tree;

pub use bucket::{Bucket, BucketVisitor, EntryAction, Flow, Visit, INDEXES_DIR_NAME};
pub use codec::{BucketCodec, ByteReader};
pub use error::{IndexError, IndexResult};
pub use history::{merge, HistoryCodec, HistoryEntry, StateEditor, StateRecord, HISTORY_VERSION};
pub use tree::{
    segment_hash, BucketTree, MAX_SEGMENT_QUOTA, PROJECTS_DIR_NAME, ROOT_DIR_NAME,
    VERSION_FILE_NAME,
};
