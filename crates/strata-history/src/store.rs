use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use strata_index::{
    BucketTree, BucketVisitor, EntryAction, HistoryCodec, HistoryEntry, IndexResult,
    StateRecord, Visit, HISTORY_VERSION,
};
use strata_store::BlobStore;
use strata_types::{now_millis, BlobId, CancelToken, Depth, HistoryState, ResourcePath};
use tracing::{debug, warn};

use crate::config::{HistoryPolicy, StoreConfig};
use crate::error::{HistoryError, HistoryResult};

/// Sub-directory of the store root holding blobs.
pub const BLOBS_DIR_NAME: &str = "blobs";
/// Sub-directory of the store root holding the bucket tree.
pub const INDEX_DIR_NAME: &str = "index";

/// Outcome of [`HistoryStore::clean`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Paths whose entry was examined.
    pub entries_visited: usize,
    /// States dropped by the retention policy.
    pub states_removed: usize,
    /// Blob files deleted afterwards.
    pub blobs_deleted: usize,
}

/// Local history of workspace files.
///
/// Content goes to a [`BlobStore`]; the `(path, blob, timestamp)` records go
/// to a [`BucketTree`] of history buckets. All index work runs under one
/// mutex, so the store can be shared between threads but serves one
/// operation at a time.
///
/// Recording is best-effort: [`add_state`](Self::add_state) and
/// [`remove`](Self::remove) log failures instead of returning them.
pub struct HistoryStore {
    blobs: BlobStore,
    inner: Mutex<Inner>,
}

struct Inner {
    blobs: BlobStore,
    tree: BucketTree<HistoryCodec>,
    policy: HistoryPolicy,
    /// Blobs no longer referenced by the entries that held them.
    pending: BTreeSet<BlobId>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("blobs", &self.blobs.root())
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Open (or create) a history store under `root`.
    ///
    /// An index written in a different format is discarded: its blobs
    /// become garbage for [`remove_garbage`](Self::remove_garbage).
    pub fn open(root: impl AsRef<Path>, config: StoreConfig) -> HistoryResult<Self> {
        let root = root.as_ref();
        let blobs = BlobStore::open(root.join(BLOBS_DIR_NAME), config.blob_shards)?;
        let mut tree = BucketTree::new(HistoryCodec, root.join(INDEX_DIR_NAME), config.segment_quota)?;

        if let Some(found) = tree.stored_version()? {
            if found != HISTORY_VERSION {
                warn!(
                    found,
                    expected = HISTORY_VERSION,
                    "history index has an unsupported format; discarding it"
                );
                tree.reset()?;
            }
        }

        debug!(root = %root.display(), "opened history store");
        Ok(Self {
            blobs: blobs.clone(),
            inner: Mutex::new(Inner {
                blobs,
                tree,
                policy: config.policy,
                pending: BTreeSet::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("history store mutex poisoned")
    }

    pub fn policy(&self) -> HistoryPolicy {
        self.lock().policy.clone()
    }

    pub fn set_policy(&self, policy: HistoryPolicy) {
        self.lock().policy = policy;
    }

    /// Record the content of the file at `source` as a state of `path`.
    ///
    /// With `move_contents` the source file is consumed. Returns `None`
    /// when the content exceeds the policy's size limit or on any failure.
    pub fn add_state(
        &self,
        path: &ResourcePath,
        source: &Path,
        last_modified: i64,
        move_contents: bool,
    ) -> Option<HistoryState> {
        let size = match fs::metadata(source) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path, source = %source.display(), error = %e, "cannot read state source");
                return None;
            }
        };
        let mut inner = self.lock();
        if size > inner.policy.max_state_size {
            debug!(path = %path, size, "state too large for history");
            return None;
        }
        let blob = match inner.blobs.put_file(source, move_contents) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to store state");
                return None;
            }
        };
        // A moved source exists only as the blob now; keep it for
        // `remove_garbage` if recording fails.
        inner.record(path, blob, last_modified, !move_contents)
    }

    /// Record an in-memory buffer as a state of `path`.
    pub fn add_state_bytes(&self, path: &ResourcePath, content: &[u8], last_modified: i64) -> Option<HistoryState> {
        let mut inner = self.lock();
        if content.len() as u64 > inner.policy.max_state_size {
            debug!(path = %path, size = content.len(), "state too large for history");
            return None;
        }
        let blob = match inner.blobs.put_bytes(content) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to store state");
                return None;
            }
        };
        inner.record(path, blob, last_modified, true)
    }

    /// States of `path`, newest first, within the policy's count and age.
    ///
    /// Expired states are skipped here but only removed by
    /// [`clean`](Self::clean).
    pub fn get_states(&self, path: &ResourcePath) -> HistoryResult<Vec<HistoryState>> {
        let mut inner = self.lock();
        if !inner.load_readable(path)? {
            return Ok(Vec::new());
        }
        let Some(entry) = inner.tree.current().get(path) else {
            return Ok(Vec::new());
        };
        let now = now_millis();
        let policy = &inner.policy;
        Ok(entry
            .states()
            .iter()
            .filter(|s| !policy.is_expired(s.timestamp, now))
            .take(policy.max_states)
            .map(|s| s.to_state(path))
            .collect())
    }

    /// The most recent state of `path`, regardless of the retention
    /// policy.
    pub fn newest_state(&self, path: &ResourcePath) -> HistoryResult<Option<HistoryState>> {
        let mut inner = self.lock();
        if !inner.load_readable(path)? {
            return Ok(None);
        }
        let newest = inner.tree.current().get(path).and_then(HistoryEntry::newest);
        Ok(newest.map(|s| s.to_state(path)))
    }

    /// Paths with recorded history at or below `base`, within `depth`.
    pub fn all_files(&self, base: &ResourcePath, depth: Depth) -> HistoryResult<Vec<ResourcePath>> {
        let mut inner = self.lock();
        let mut files = Vec::new();
        let mut visitor = |path: &ResourcePath, _: &HistoryEntry| -> IndexResult<Visit<HistoryEntry>> {
            files.push(path.clone());
            Ok(Visit::proceed())
        };
        inner.tree.accept(&mut visitor, base, depth)?;
        files.sort();
        Ok(files)
    }

    /// Read back the content of a state.
    pub fn get_contents(&self, state: &HistoryState) -> HistoryResult<Vec<u8>> {
        Ok(self.blobs.read(&state.blob_id)?)
    }

    /// Whether the content of a state is still physically present.
    pub fn exists(&self, state: &HistoryState) -> bool {
        self.blobs.exists(&state.blob_id)
    }

    /// Location of a state's content file.
    pub fn file_for(&self, state: &HistoryState) -> PathBuf {
        self.blobs.file_for(&state.blob_id)
    }

    /// Apply the retention policy to every entry, then delete the blobs it
    /// released.
    pub fn clean(&self, cancel: &CancelToken) -> HistoryResult<CleanReport> {
        let mut inner = self.lock();
        let mut cleaner = Cleaner::new(inner.policy.clone(), Some(cancel));
        let walked = inner.tree.accept(&mut cleaner, &ResourcePath::root(), Depth::Infinite);

        let mut report = cleaner.report.clone();
        inner.pending.extend(cleaner.released);
        walked?;
        if cleaner.canceled {
            debug!(removed = report.states_removed, "history clean canceled");
            return Err(HistoryError::Canceled);
        }
        report.blobs_deleted = inner.flush_pending()?;
        debug!(
            entries = report.entries_visited,
            states = report.states_removed,
            blobs = report.blobs_deleted,
            "cleaned history"
        );
        Ok(report)
    }

    /// Copy the history of `source` and everything below it to `dest`.
    ///
    /// Moving a whole project relocates its index instead. Returns the
    /// number of entries copied.
    pub fn copy_history(&self, source: &ResourcePath, dest: &ResourcePath, is_move: bool) -> HistoryResult<usize> {
        if source == dest || source.is_root() || dest.is_root() {
            return Ok(0);
        }
        let mut inner = self.lock();

        if is_move && source.segment_count() == 1 && dest.segment_count() == 1 {
            if let (Some(from), Some(to)) = (source.project_name(), dest.project_name()) {
                if inner.tree.move_project(from, to)? {
                    return Ok(0);
                }
            }
        }

        // Collect first; the destination buckets may be the ones being read.
        let mut copies: Vec<(ResourcePath, HistoryEntry)> = Vec::new();
        let mut visitor = |path: &ResourcePath, entry: &HistoryEntry| -> IndexResult<Visit<HistoryEntry>> {
            if let Some(target) = path.rebase(source, dest) {
                copies.push((target, entry.clone()));
            }
            Ok(Visit::proceed())
        };
        inner.tree.accept(&mut visitor, source, Depth::Infinite)?;
        let copied = copies.len();

        let mut by_bucket: BTreeMap<PathBuf, Vec<(ResourcePath, HistoryEntry)>> = BTreeMap::new();
        for (path, entry) in copies {
            by_bucket
                .entry(inner.tree.location_for(&path))
                .or_default()
                .push((path, entry));
        }
        for (_, group) in by_bucket {
            let Some((first, _)) = group.first() else {
                continue;
            };
            inner.load_bucket_for(first)?;
            let bucket = inner.tree.current_mut();
            for (path, entry) in group {
                let mut merged = bucket.get(&path).cloned().unwrap_or_default();
                merged.merge_from(&entry);
                bucket.set_entry_value(&path, Some(merged));
            }
            bucket.save()?;
        }

        let mut cleaner = Cleaner::new(inner.policy.clone(), None);
        let walked = inner.tree.accept(&mut cleaner, dest, Depth::Infinite);
        inner.pending.extend(cleaner.released);
        walked?;
        inner.flush_if_due()?;

        debug!(source = %source, dest = %dest, entries = copied, "copied history");
        Ok(copied)
    }

    /// Forget the history of `path` and everything below it.
    ///
    /// The blobs are queued for deletion. Returns the number of states
    /// forgotten; failures are logged and yield 0.
    pub fn remove(&self, path: &ResourcePath) -> usize {
        let mut inner = self.lock();
        match inner.remove(path) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to remove history");
                0
            }
        }
    }

    /// Delete every stored blob no index entry refers to.
    ///
    /// A full scan of both the index and the blob store; meant for
    /// maintenance rather than routine use. Deletes nothing while some
    /// bucket cannot be read, since its references are unknown.
    pub fn remove_garbage(&self) -> HistoryResult<usize> {
        let mut inner = self.lock();
        let referenced = inner.referenced_blobs()?;
        let unreadable = inner.tree.skipped_buckets().len();
        if unreadable > 0 {
            warn!(unreadable, "not collecting garbage while buckets are unreadable");
            return Ok(0);
        }
        let garbage: Vec<BlobId> = inner
            .blobs
            .all_ids()?
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect();
        inner.pending.clear();
        let deleted = inner.delete_batched(&garbage);
        debug!(deleted, referenced = referenced.len(), "removed garbage blobs");
        Ok(deleted)
    }

    /// Save the index, flush queued blob deletions and write the format
    /// marker.
    pub fn close(&self) -> HistoryResult<()> {
        let mut inner = self.lock();
        inner.tree.save()?;
        inner.flush_pending()?;
        inner.tree.close()?;
        Ok(())
    }
}

impl Inner {
    fn load_bucket_for(&mut self, path: &ResourcePath) -> HistoryResult<()> {
        Ok(self.tree.load_bucket_for(path)?)
    }

    /// Load the bucket for `path`; `false` when its file is unreadable.
    fn load_readable(&mut self, path: &ResourcePath) -> HistoryResult<bool> {
        match self.tree.load_bucket_for(path) {
            Ok(()) => Ok(true),
            Err(e) if e.is_unreadable_bucket() => {
                warn!(path = %path, error = %e, "history bucket unreadable");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add a state to the entry of `path`. On failure the blob is deleted
    /// only when `owns_blob`.
    fn record(&mut self, path: &ResourcePath, blob: BlobId, last_modified: i64, owns_blob: bool) -> Option<HistoryState> {
        let result = self.load_bucket_for(path).map(|()| {
            let bucket = self.tree.current_mut();
            let mut entry = bucket.get(path).cloned().unwrap_or_default();
            entry.insert(StateRecord::new(blob, last_modified));
            bucket.set_entry_value(path, Some(entry));
        });
        match result {
            Ok(()) => {
                debug!(path = %path, blob = %blob, last_modified, "recorded state");
                Some(HistoryState::new(path.clone(), blob, last_modified))
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to record state");
                if owns_blob {
                    self.blobs.delete(&blob);
                }
                None
            }
        }
    }

    fn remove(&mut self, path: &ResourcePath) -> HistoryResult<usize> {
        let mut released = Vec::new();
        let mut visitor = |_: &ResourcePath, entry: &HistoryEntry| -> IndexResult<Visit<HistoryEntry>> {
            released.extend(entry.states().iter().map(|s| s.blob_id));
            Ok(Visit::apply(EntryAction::Delete))
        };
        let walked = self.tree.accept(&mut visitor, path, Depth::Infinite);
        let removed = released.len();
        self.pending.extend(released);
        walked?;
        self.flush_if_due()?;
        debug!(path = %path, states = removed, "removed history");
        Ok(removed)
    }

    fn referenced_blobs(&mut self) -> HistoryResult<HashSet<BlobId>> {
        let mut referenced = HashSet::new();
        let mut visitor = |_: &ResourcePath, entry: &HistoryEntry| -> IndexResult<Visit<HistoryEntry>> {
            referenced.extend(entry.states().iter().map(|s| s.blob_id));
            Ok(Visit::proceed())
        };
        self.tree.accept(&mut visitor, &ResourcePath::root(), Depth::Infinite)?;
        Ok(referenced)
    }

    fn flush_if_due(&mut self) -> HistoryResult<usize> {
        if self.pending.len() < self.policy.gc_batch_size.max(1) {
            return Ok(0);
        }
        self.flush_pending()
    }

    /// Delete queued blobs, except those another entry still references.
    fn flush_pending(&mut self) -> HistoryResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let referenced = self.referenced_blobs()?;
        let doomed: Vec<BlobId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect();
        Ok(self.delete_batched(&doomed))
    }

    fn delete_batched(&self, ids: &[BlobId]) -> usize {
        ids.chunks(self.policy.gc_batch_size.max(1))
            .map(|batch| self.blobs.delete_many(batch))
            .sum()
    }
}

/// Applies the retention policy entry by entry.
struct Cleaner<'a> {
    policy: HistoryPolicy,
    now: i64,
    cancel: Option<&'a CancelToken>,
    canceled: bool,
    released: Vec<BlobId>,
    report: CleanReport,
}

impl<'a> Cleaner<'a> {
    fn new(policy: HistoryPolicy, cancel: Option<&'a CancelToken>) -> Self {
        Self {
            policy,
            now: now_millis(),
            cancel,
            canceled: false,
            released: Vec::new(),
            report: CleanReport::default(),
        }
    }
}

impl BucketVisitor<HistoryEntry> for Cleaner<'_> {
    fn visit(&mut self, _: &ResourcePath, entry: &HistoryEntry) -> IndexResult<Visit<HistoryEntry>> {
        if self.cancel.is_some_and(CancelToken::is_canceled) {
            self.canceled = true;
            return Ok(Visit::stop());
        }
        self.report.entries_visited += 1;

        let mut editor = entry.editor();
        let expired: Vec<usize> = editor
            .live()
            .filter(|(i, s)| !self.policy.keeps(*i, s.timestamp, self.now))
            .map(|(i, _)| i)
            .collect();
        for index in expired {
            if let Some(state) = editor.delete(index) {
                self.released.push(state.blob_id);
                self.report.states_removed += 1;
            }
        }
        Ok(Visit::apply(editor.finish()))
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.tree.save() {
            warn!(error = %e, "failed to save history index on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_index::BucketCodec;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::new(s).unwrap()
    }

    fn forever(max_states: usize) -> StoreConfig {
        StoreConfig {
            policy: HistoryPolicy {
                max_states,
                longevity_ms: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn open(tmp: &tempfile::TempDir, config: StoreConfig) -> HistoryStore {
        HistoryStore::open(tmp.path(), config).unwrap()
    }

    fn blob_count(store: &HistoryStore) -> usize {
        store.blobs.all_ids().unwrap().len()
    }

    /// Close `store`, then rewrite the version byte of the bucket holding
    /// `path` to a format this build does not read.
    fn age_bucket_of(store: HistoryStore, path: &ResourcePath) {
        let file = store.lock().tree.location_for(path).join(HistoryCodec::FILE_NAME);
        store.close().unwrap();
        drop(store);
        let mut bytes = fs::read(&file).unwrap();
        bytes[0] = HISTORY_VERSION - 1;
        fs::write(&file, bytes).unwrap();
    }

    #[test]
    fn unreadable_bucket_does_not_block_other_projects() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(5));
        let a = p("/p/a.txt");
        let b = p("/q/b.txt");
        store.add_state_bytes(&a, b"a", 100).unwrap();
        store.add_state_bytes(&b, b"b1", 100).unwrap();
        store.add_state_bytes(&b, b"b2", 200).unwrap();
        age_bucket_of(store, &a);

        let store = open(&tmp, forever(1));
        let report = store.clean(&CancelToken::new()).unwrap();
        assert_eq!(report.states_removed, 1);
        assert_eq!(store.all_files(&ResourcePath::root(), Depth::Infinite).unwrap(), vec![b.clone()]);
        assert!(store.get_states(&a).unwrap().is_empty());
        assert_eq!(store.newest_state(&a).unwrap(), None);

        // Blobs referenced only by the unreadable bucket survive.
        assert_eq!(store.remove_garbage().unwrap(), 0);
        assert_eq!(blob_count(&store), 2);
    }

    #[test]
    fn recording_never_overwrites_an_unreadable_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(5));
        let a = p("/p/a.txt");
        store.add_state_bytes(&a, b"a", 100).unwrap();
        let file = store.lock().tree.location_for(&a).join(HistoryCodec::FILE_NAME);
        age_bucket_of(store, &a);
        let legacy = fs::read(&file).unwrap();

        let store = open(&tmp, forever(5));
        assert!(store.add_state_bytes(&p("/p/c.txt"), b"c", 300).is_none());
        assert_eq!(blob_count(&store), 1, "copied content is dropped");

        let source = tmp.path().join("moved.txt");
        fs::write(&source, b"moved").unwrap();
        assert!(store.add_state(&p("/p/d.txt"), &source, 400, true).is_none());
        assert!(!source.exists());
        assert_eq!(blob_count(&store), 2, "moved content is kept");

        store.close().unwrap();
        assert_eq!(fs::read(&file).unwrap(), legacy);
    }

    #[test]
    fn newest_state_ignores_the_age_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            policy: HistoryPolicy {
                longevity_ms: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        };
        let store = open(&tmp, config);
        let path = p("/p/old.txt");
        let state = store.add_state_bytes(&path, b"old", 5).unwrap();

        assert!(store.get_states(&path).unwrap().is_empty());
        assert_eq!(store.newest_state(&path).unwrap(), Some(state));
        assert_eq!(store.newest_state(&p("/p/none.txt")).unwrap(), None);
    }

    #[test]
    fn states_come_back_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(5));
        let path = p("/p/a.txt");

        let b1 = store.add_state_bytes(&path, b"one", 100).unwrap();
        let b2 = store.add_state_bytes(&path, b"two", 200).unwrap();

        let states = store.get_states(&path).unwrap();
        assert_eq!(states, vec![b2.clone(), b1.clone()]);
        assert_eq!(store.get_contents(&states[0]).unwrap(), b"two");
        assert_eq!(store.get_contents(&states[1]).unwrap(), b"one");

        // Both blobs referenced: nothing to collect.
        assert_eq!(store.remove_garbage().unwrap(), 0);

        assert_eq!(store.remove(&path), 2);
        assert_eq!(store.remove_garbage().unwrap(), 2);
        assert!(!store.exists(&b1));
        assert!(!store.exists(&b2));
        assert!(store.get_states(&path).unwrap().is_empty());
    }

    #[test]
    fn equal_timestamps_order_by_blob_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        let path = p("/p/a.txt");
        for i in 0..4u8 {
            store.add_state_bytes(&path, &[i], 7).unwrap();
        }
        let states = store.get_states(&path).unwrap();
        assert_eq!(states.len(), 4);
        assert!(states.windows(2).all(|w| w[0].blob_id > w[1].blob_id));
    }

    #[test]
    fn add_state_from_file_copy_and_move() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        let path = p("/p/a.txt");
        let source = tmp.path().join("work.txt");

        fs::write(&source, b"first").unwrap();
        let copied = store.add_state(&path, &source, 1, false).unwrap();
        assert!(source.exists());

        fs::write(&source, b"second").unwrap();
        let moved = store.add_state(&path, &source, 2, true).unwrap();
        assert!(!source.exists());

        assert_eq!(store.get_contents(&copied).unwrap(), b"first");
        assert_eq!(store.get_contents(&moved).unwrap(), b"second");
        assert!(store.file_for(&moved).is_file());
    }

    #[test]
    fn oversized_content_is_rejected_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = forever(10);
        config.policy.max_state_size = 4;
        let store = open(&tmp, config);
        let path = p("/p/big.bin");
        assert!(store.add_state_bytes(&path, b"too large", 1).is_none());
        assert!(store.add_state_bytes(&path, b"ok", 1).is_some());
        assert_eq!(blob_count(&store), 1);
    }

    #[test]
    fn missing_source_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        assert!(store
            .add_state(&p("/p/a.txt"), &tmp.path().join("nope"), 1, false)
            .is_none());
    }

    #[test]
    fn clean_keeps_the_newest_states() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(3));
        let path = p("/p/a.txt");
        let states: Vec<HistoryState> = (1..=5)
            .map(|t| store.add_state_bytes(&path, format!("v{t}").as_bytes(), t * 100).unwrap())
            .collect();

        let report = store.clean(&CancelToken::new()).unwrap();
        assert_eq!(report.entries_visited, 1);
        assert_eq!(report.states_removed, 2);
        assert_eq!(report.blobs_deleted, 2);

        store.set_policy(forever(10).policy);
        let kept: Vec<i64> = store.get_states(&path).unwrap().iter().map(|s| s.last_modified).collect();
        assert_eq!(kept, vec![500, 400, 300]);
        assert!(!store.exists(&states[0]));
        assert!(!store.exists(&states[1]));
        assert!(store.exists(&states[4]));
    }

    #[test]
    fn expired_states_are_hidden_then_cleaned() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = forever(10);
        config.policy.longevity_ms = Some(60_000);
        let store = open(&tmp, config);
        let path = p("/p/a.txt");
        let now = now_millis();
        let old = store.add_state_bytes(&path, b"old", now - 3_600_000).unwrap();
        let fresh = store.add_state_bytes(&path, b"fresh", now).unwrap();

        assert_eq!(store.get_states(&path).unwrap(), vec![fresh.clone()]);
        // Hidden but still stored until the clean pass.
        assert!(store.exists(&old));

        let report = store.clean(&CancelToken::new()).unwrap();
        assert_eq!(report.states_removed, 1);
        assert!(!store.exists(&old));
        assert!(store.exists(&fresh));
    }

    #[test]
    fn canceled_clean_reports_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(1));
        store.add_state_bytes(&p("/p/a.txt"), b"1", 1).unwrap();
        store.add_state_bytes(&p("/p/a.txt"), b"2", 2).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = store.clean(&cancel).unwrap_err();
        assert!(err.is_canceled());
        // Nothing was trimmed.
        assert_eq!(blob_count(&store), 2);
    }

    #[test]
    fn copy_history_is_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        let source = p("/p/a.txt");
        store.add_state_bytes(&source, b"1", 100).unwrap();
        store.add_state_bytes(&source, b"2", 200).unwrap();
        let before = store.get_states(&source).unwrap();

        assert_eq!(store.copy_history(&p("/p"), &p("/q"), false).unwrap(), 1);
        let copied = store.get_states(&p("/q/a.txt")).unwrap();
        let ids = |states: &[HistoryState]| states.iter().map(|s| (s.blob_id, s.last_modified)).collect::<Vec<_>>();
        assert_eq!(ids(&copied), ids(&before));

        store.add_state_bytes(&source, b"3", 300).unwrap();
        assert_eq!(store.get_states(&p("/q/a.txt")).unwrap().len(), 2);
        assert_eq!(store.get_states(&source).unwrap().len(), 3);
    }

    #[test]
    fn shared_blobs_survive_removal_of_one_side() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = forever(10);
        config.policy.gc_batch_size = 1;
        let store = open(&tmp, config);
        let state = store.add_state_bytes(&p("/p/dir/a.txt"), b"shared", 1).unwrap();
        store.copy_history(&p("/p/dir"), &p("/p/other"), false).unwrap();

        // The queue flushes immediately, but the copy still needs the blob.
        store.remove(&p("/p/dir"));
        store.close().unwrap();
        assert!(store.exists(&state));
        assert_eq!(store.get_states(&p("/p/other/a.txt")).unwrap().len(), 1);
    }

    #[test]
    fn copy_merges_into_existing_history() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        store.add_state_bytes(&p("/p/a.txt"), b"1", 100).unwrap();
        store.add_state_bytes(&p("/q/a.txt"), b"2", 150).unwrap();
        store.copy_history(&p("/p/a.txt"), &p("/q/a.txt"), false).unwrap();
        let merged: Vec<i64> = store
            .get_states(&p("/q/a.txt"))
            .unwrap()
            .iter()
            .map(|s| s.last_modified)
            .collect();
        assert_eq!(merged, vec![150, 100]);

        // Copying again adds no duplicates.
        store.copy_history(&p("/p/a.txt"), &p("/q/a.txt"), false).unwrap();
        assert_eq!(store.get_states(&p("/q/a.txt")).unwrap().len(), 2);
    }

    #[test]
    fn moving_a_project_relocates_its_history() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        store.add_state_bytes(&p("/p/src/lib.rs"), b"x", 1).unwrap();
        store.copy_history(&p("/p"), &p("/renamed"), true).unwrap();

        assert_eq!(store.get_states(&p("/renamed/src/lib.rs")).unwrap().len(), 1);
        assert!(store.get_states(&p("/p/src/lib.rs")).unwrap().is_empty());
        assert_eq!(store.all_files(&ResourcePath::root(), Depth::Infinite).unwrap(), vec![p("/renamed/src/lib.rs")]);
    }

    #[test]
    fn copy_applies_policy_to_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        for t in 1..=4 {
            store.add_state_bytes(&p("/p/a.txt"), &[t as u8], t).unwrap();
        }
        store.set_policy(forever(2).policy);
        store.copy_history(&p("/p/a.txt"), &p("/p/b.txt"), false).unwrap();

        store.set_policy(forever(10).policy);
        assert_eq!(store.get_states(&p("/p/b.txt")).unwrap().len(), 2);
        // The source keeps its states and every blob is still referenced.
        assert_eq!(store.get_states(&p("/p/a.txt")).unwrap().len(), 4);
        assert_eq!(store.remove_garbage().unwrap(), 0);
    }

    #[test]
    fn all_files_lists_paths_with_history() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp, forever(10));
        for path in ["/p/a.txt", "/p/dir/b.txt", "/p/dir/sub/c.txt", "/q/d.txt"] {
            store.add_state_bytes(&p(path), b"x", 1).unwrap();
        }
        assert_eq!(
            store.all_files(&p("/p/dir"), Depth::One).unwrap(),
            vec![p("/p/dir/b.txt")]
        );
        assert_eq!(store.all_files(&ResourcePath::root(), Depth::Infinite).unwrap().len(), 4);
    }

    #[test]
    fn history_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = p("/p/deep/er/a.txt");
        {
            let store = open(&tmp, forever(10));
            store.add_state_bytes(&path, b"kept", 42).unwrap();
            store.close().unwrap();
        }
        let store = open(&tmp, forever(10));
        let states = store.get_states(&path).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(store.get_contents(&states[0]).unwrap(), b"kept");
    }

    #[test]
    fn unsaved_state_is_flushed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open(&tmp, forever(10));
            store.add_state_bytes(&p("/p/a.txt"), b"x", 1).unwrap();
        }
        let store = open(&tmp, forever(10));
        assert_eq!(store.get_states(&p("/p/a.txt")).unwrap().len(), 1);
    }

    #[test]
    fn stale_index_format_is_discarded_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open(&tmp, forever(10));
            store.add_state_bytes(&p("/p/a.txt"), b"x", 1).unwrap();
            store.close().unwrap();
        }
        let marker = tmp
            .path()
            .join(INDEX_DIR_NAME)
            .join(strata_index::ROOT_DIR_NAME)
            .join(strata_index::INDEXES_DIR_NAME)
            .join(strata_index::VERSION_FILE_NAME);
        fs::write(&marker, [HISTORY_VERSION + 1]).unwrap();

        let store = open(&tmp, forever(10));
        assert!(store.get_states(&p("/p/a.txt")).unwrap().is_empty());
        // The orphaned blob is now garbage.
        assert_eq!(store.remove_garbage().unwrap(), 1);
    }

    #[test]
    fn queued_deletions_flush_at_batch_size() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = forever(10);
        config.policy.gc_batch_size = 3;
        let store = open(&tmp, config);
        for name in ["a", "b", "c"] {
            store.add_state_bytes(&p(&format!("/p/{name}")), b"x", 1).unwrap();
        }
        store.remove(&p("/p/a"));
        store.remove(&p("/p/b"));
        assert_eq!(blob_count(&store), 3, "below the batch size nothing is deleted");
        store.remove(&p("/p/c"));
        assert_eq!(blob_count(&store), 0);
    }
}
