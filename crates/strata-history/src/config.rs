use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HistoryResult;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Which states survive, and which content is recorded at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPolicy {
    /// Most states kept per path (default: 50).
    pub max_states: usize,
    /// Oldest state kept, in milliseconds of age (default: 7 days).
    /// `None` keeps states forever.
    pub longevity_ms: Option<u64>,
    /// Largest content recorded, in bytes (default: 1 MiB).
    pub max_state_size: u64,
    /// Queued blob deletions that trigger a collection (default: 100).
    pub gc_batch_size: usize,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            max_states: 50,
            longevity_ms: Some(7 * DAY_MS),
            max_state_size: 1024 * 1024,
            gc_batch_size: 100,
        }
    }
}

impl HistoryPolicy {
    /// States recorded before this instant are expired, relative to `now`.
    pub fn min_timestamp(&self, now: i64) -> Option<i64> {
        self.longevity_ms
            .map(|ms| now.saturating_sub(i64::try_from(ms).unwrap_or(i64::MAX)))
    }

    pub fn is_expired(&self, timestamp: i64, now: i64) -> bool {
        self.min_timestamp(now).is_some_and(|min| timestamp < min)
    }

    /// Whether the state at position `index` (0 = newest) survives.
    pub fn keeps(&self, index: usize, timestamp: i64, now: i64) -> bool {
        index < self.max_states && !self.is_expired(timestamp, now)
    }
}

/// On-disk configuration of a history store.
///
/// ```toml
/// blob_shards = 256
/// segment_quota = 256
///
/// [policy]
/// max_states = 50
/// longevity_ms = 604800000
/// max_state_size = 1048576
/// gc_batch_size = 100
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Blob shard directories, a power of two up to 256.
    pub blob_shards: usize,
    /// Fan-out of each bucket shard level, a power of two up to 256.
    pub segment_quota: usize,
    pub policy: HistoryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blob_shards: 256,
            segment_quota: 256,
            policy: HistoryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> HistoryResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file.
    pub fn load(path: &Path) -> HistoryResult<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}
