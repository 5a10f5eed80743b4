use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::blob::BlobId;
use crate::path::ResourcePath;

/// One recorded past state of a resource.
///
/// States of the same path are presented newest first: descending
/// `last_modified`, ties broken by descending `blob_id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryState {
    /// The resource the state belongs to.
    pub path: ResourcePath,
    /// The blob holding the state's content.
    pub blob_id: BlobId,
    /// Last-modified time of the resource when the state was recorded,
    /// in milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl HistoryState {
    /// Create a new state reference.
    pub fn new(path: ResourcePath, blob_id: BlobId, last_modified: i64) -> Self {
        Self {
            path,
            blob_id,
            last_modified,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    to_millis(SystemTime::now())
}

/// Convert a `SystemTime` to milliseconds since the Unix epoch.
///
/// Times before the epoch come out negative.
pub fn to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
