//! Local history for Strata workspaces.
//!
//! [`HistoryStore`] records past states of files: content goes into a
//! sharded blob store, `(path, blob, timestamp)` records into a bucket
//! index. A retention policy bounds how many states survive, and for how
//! long.
//!
//! # Operations
//!
//! - record: [`HistoryStore::add_state`], [`HistoryStore::add_state_bytes`]
//! - query: [`HistoryStore::get_states`], [`HistoryStore::all_files`],
//!   [`HistoryStore::get_contents`]
//! - maintain: [`HistoryStore::clean`], [`HistoryStore::remove_garbage`]
//! - follow resource changes: [`HistoryStore::copy_history`],
//!   [`HistoryStore::remove`]

pub mod config;
pub mod error;
pub mod store;

pub use config::{HistoryPolicy, StoreConfig};
pub use error::{HistoryError, HistoryResult};
pub use store::{CleanReport, HistoryStore, BLOBS_DIR_NAME, INDEX_DIR_NAME};
