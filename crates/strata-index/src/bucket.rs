use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use strata_types::ResourcePath;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::codec::{write_utf, BucketCodec, ByteReader};
use crate::error::{IndexError, IndexResult};

/// Name of the directory at the top of every bucket shard tree. Empty-bucket
/// cleanup never removes it.
pub const INDEXES_DIR_NAME: &str = ".indexes";

/// How a visitor wants the traversal to proceed after an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep visiting.
    Continue,
    /// Abort the whole traversal.
    Stop,
    /// Skip the rest of this bucket; siblings are still visited.
    Return,
}

/// What to do with the entry that was just visited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryAction<V> {
    Keep,
    /// Replace the value (after [`BucketCodec::compact`]).
    Mutate(V),
    Delete,
}

/// A visitor's answer for one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Visit<V> {
    pub action: EntryAction<V>,
    pub flow: Flow,
}

impl<V> Visit<V> {
    pub fn new(action: EntryAction<V>, flow: Flow) -> Self {
        Self { action, flow }
    }

    /// Keep the entry and continue.
    pub fn proceed() -> Self {
        Self::new(EntryAction::Keep, Flow::Continue)
    }

    /// Apply `action` and continue.
    pub fn apply(action: EntryAction<V>) -> Self {
        Self::new(action, Flow::Continue)
    }

    /// Keep the entry and abort the traversal.
    pub fn stop() -> Self {
        Self::new(EntryAction::Keep, Flow::Stop)
    }
}

/// Callback driven by [`Bucket::accept`] and
/// [`BucketTree::accept`](crate::BucketTree::accept).
pub trait BucketVisitor<V> {
    /// Visit one entry.
    fn visit(&mut self, path: &ResourcePath, value: &V) -> IndexResult<Visit<V>>;

    /// Runs right before a visited bucket is saved.
    fn before_saving(&mut self, _location: Option<&Path>) -> IndexResult<()> {
        Ok(())
    }

    /// Runs right after a visited bucket is saved.
    fn after_saving(&mut self, _location: Option<&Path>) -> IndexResult<()> {
        Ok(())
    }
}

impl<V, F> BucketVisitor<V> for F
where
    F: FnMut(&ResourcePath, &V) -> IndexResult<Visit<V>>,
{
    fn visit(&mut self, path: &ResourcePath, value: &V) -> IndexResult<Visit<V>> {
        self(path, value)
    }
}

/// Persistent dictionary from resource path to value, scoped to one
/// directory of the resource hierarchy.
///
/// File format:
/// ```text
/// [version u8][entry count u32]
///   ([key: u16 length + UTF-8][value: codec-defined])*
/// ```
///
/// With a scope (project name) set, keys are stored without their leading
/// project segment.
pub struct Bucket<C: BucketCodec> {
    codec: C,
    entries: BTreeMap<ResourcePath, C::Value>,
    location: Option<PathBuf>,
    scope: Option<String>,
    needs_saving: bool,
}

impl<C: BucketCodec> std::fmt::Debug for Bucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("location", &self.location)
            .field("scope", &self.scope)
            .field("entries", &self.entries.len())
            .field("needs_saving", &self.needs_saving)
            .finish()
    }
}

impl<C: BucketCodec> Bucket<C> {
    /// An unloaded bucket.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            entries: BTreeMap::new(),
            location: None,
            scope: None,
            needs_saving: false,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Directory this bucket was loaded from.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Full path of the backing file, if loaded.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.location.as_ref().map(|dir| dir.join(C::FILE_NAME))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.needs_saving
    }

    pub fn get(&self, path: &ResourcePath) -> Option<&C::Value> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ResourcePath, &C::Value)> {
        self.entries.iter()
    }

    /// Load the bucket stored in `dir`.
    ///
    /// No-op when that bucket is already resident and `force` is false.
    /// Otherwise the resident bucket is saved first. A missing file yields
    /// an empty bucket. A file that cannot be decoded leaves the bucket
    /// detached, so nothing is ever written over it.
    pub fn load(&mut self, scope: Option<&str>, dir: &Path, force: bool) -> IndexResult<()> {
        if !force && self.location.as_deref() == Some(dir) && self.scope.as_deref() == scope {
            return Ok(());
        }
        self.save()?;

        self.location = Some(dir.to_path_buf());
        self.scope = scope.map(str::to_string);
        self.entries.clear();
        self.needs_saving = false;

        let file = dir.join(C::FILE_NAME);
        let data = match fs::read(&file) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.entries = match self.decode(&data, &file) {
            Ok(entries) => entries,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        debug!(bucket = %file.display(), entries = self.entries.len(), "loaded bucket");
        Ok(())
    }

    fn decode(&self, data: &[u8], file: &Path) -> IndexResult<BTreeMap<ResourcePath, C::Value>> {
        let mut reader = ByteReader::new(data, file);
        let version = reader.read_u8()?;
        if version != C::VERSION {
            return Err(IndexError::FormatVersionMismatch {
                path: file.to_path_buf(),
                expected: C::VERSION,
                found: version,
            });
        }
        let count = reader.read_u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = reader.read_utf()?;
            let path = match &self.scope {
                Some(scope) => ResourcePath::new(&format!("/{scope}{key}"))?,
                None => ResourcePath::new(key)?,
            };
            let value = self.codec.read_value(&mut reader)?;
            entries.insert(path, value);
        }
        if reader.remaining() != 0 {
            return Err(reader.corrupt(format!("{} trailing bytes", reader.remaining())));
        }
        Ok(entries)
    }

    /// Write the bucket back if it changed since it was loaded.
    ///
    /// An empty bucket deletes its file and any shard directories left
    /// empty, stopping at the `.indexes` directory.
    pub fn save(&mut self) -> IndexResult<()> {
        if !self.needs_saving {
            return Ok(());
        }
        let Some(dir) = self.location.clone() else {
            self.needs_saving = false;
            return Ok(());
        };
        let file = dir.join(C::FILE_NAME);

        if self.entries.is_empty() {
            self.needs_saving = false;
            remove_empty(&file, &dir);
            return Ok(());
        }

        let data = self.encode(&file)?;
        fs::create_dir_all(&dir)?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&file).map_err(|e| e.error)?;
        self.needs_saving = false;
        debug!(bucket = %file.display(), entries = self.entries.len(), "saved bucket");
        Ok(())
    }

    fn encode(&self, file: &Path) -> IndexResult<Vec<u8>> {
        let mut out = Vec::with_capacity(64 * self.entries.len() + 5);
        out.push(C::VERSION);
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (path, value) in &self.entries {
            let key = self.key_for(path);
            if key.len() > u16::MAX as usize {
                return Err(IndexError::Corrupt {
                    path: file.to_path_buf(),
                    reason: format!("key too long to store: {path}"),
                });
            }
            write_utf(&mut out, key);
            self.codec.write_value(value, &mut out);
        }
        Ok(out)
    }

    fn key_for<'p>(&self, path: &'p ResourcePath) -> &'p str {
        if self.scope.is_none() {
            return path.as_str();
        }
        let full = path.as_str();
        match full[1..].find('/') {
            Some(slash) => &full[slash + 1..],
            None => "/",
        }
    }

    /// Insert, replace (`Some`) or remove (`None`) the entry for `path`.
    pub fn set_entry_value(&mut self, path: &ResourcePath, value: Option<C::Value>) {
        match value {
            Some(value) => {
                self.entries.insert(path.clone(), value);
            }
            None => {
                self.entries.remove(path);
            }
        }
        self.needs_saving = true;
    }

    /// Drop the in-memory contents without saving and detach from any
    /// location.
    pub fn discard(&mut self) {
        self.entries.clear();
        self.location = None;
        self.scope = None;
        self.needs_saving = false;
    }

    /// Visit every entry under `filter` no more than `depth` segments
    /// below it, then save.
    ///
    /// The save and the visitor's saving hooks run even when the visitor
    /// fails; the visitor's error takes precedence.
    pub fn accept<T>(&mut self, visitor: &mut T, filter: &ResourcePath, depth: usize) -> IndexResult<Flow>
    where
        T: BucketVisitor<C::Value> + ?Sized,
    {
        if self.entries.is_empty() {
            return Ok(Flow::Continue);
        }
        let outcome = self.visit_entries(visitor, filter, depth);
        let saved = self.save_with_hooks(visitor);
        let flow = outcome?;
        saved?;
        Ok(flow)
    }

    fn visit_entries<T>(&mut self, visitor: &mut T, filter: &ResourcePath, depth: usize) -> IndexResult<Flow>
    where
        T: BucketVisitor<C::Value> + ?Sized,
    {
        let base = filter.segment_count();
        let matching: Vec<ResourcePath> = self
            .entries
            .keys()
            .filter(|path| filter.is_prefix_of(path) && path.segment_count() - base <= depth)
            .cloned()
            .collect();

        for path in matching {
            let Some(value) = self.entries.get(&path) else {
                continue;
            };
            let visit = visitor.visit(&path, value)?;
            match visit.action {
                EntryAction::Keep => {}
                EntryAction::Mutate(value) => {
                    let compacted = self.codec.compact(value);
                    self.set_entry_value(&path, compacted);
                }
                EntryAction::Delete => self.set_entry_value(&path, None),
            }
            if visit.flow != Flow::Continue {
                return Ok(visit.flow);
            }
        }
        Ok(Flow::Continue)
    }

    fn save_with_hooks<T>(&mut self, visitor: &mut T) -> IndexResult<()>
    where
        T: BucketVisitor<C::Value> + ?Sized,
    {
        let location = self.location.clone();
        visitor.before_saving(location.as_deref())?;
        self.save()?;
        visitor.after_saving(location.as_deref())
    }
}

/// Delete an emptied bucket file, then every ancestor directory that is
/// left empty, up to the enclosing `.indexes` directory.
fn remove_empty(file: &Path, dir: &Path) {
    match fs::remove_file(file) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(bucket = %file.display(), error = %e, "could not delete empty bucket");
            return;
        }
    }
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir.file_name().is_some_and(|name| name == INDEXES_DIR_NAME) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal codec storing one `u32` per path.
    #[derive(Default)]
    struct Counter;

    impl BucketCodec for Counter {
        type Value = u32;
        const VERSION: u8 = 9;

        fn read_value(&self, reader: &mut ByteReader<'_>) -> IndexResult<u32> {
            reader.read_u32()
        }

        fn write_value(&self, value: &u32, out: &mut Vec<u8>) {
            out.extend_from_slice(&value.to_be_bytes());
        }

        fn compact(&self, value: u32) -> Option<u32> {
            (value != 0).then_some(value)
        }
    }

    fn p(s: &str) -> ResourcePath {
        ResourcePath::new(s).unwrap()
    }

    fn index_dir(tmp: &tempfile::TempDir) -> PathBuf {
        tmp.path().join(INDEXES_DIR_NAME)
    }

    #[test]
    fn save_then_load_reproduces_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp).join("2a");

        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("proj"), &dir, false).unwrap();
        bucket.set_entry_value(&p("/proj/a.txt"), Some(1));
        bucket.set_entry_value(&p("/proj/dir/b.txt"), Some(2));
        bucket.set_entry_value(&p("/proj"), Some(3));
        bucket.save().unwrap();
        assert!(!bucket.is_dirty());

        let mut reloaded = Bucket::new(Counter);
        reloaded.load(Some("proj"), &dir, false).unwrap();
        let loaded: Vec<(String, u32)> = reloaded
            .entries()
            .map(|(path, v)| (path.to_string(), *v))
            .collect();
        assert_eq!(
            loaded,
            vec![
                ("/proj".to_string(), 3),
                ("/proj/a.txt".to_string(), 1),
                ("/proj/dir/b.txt".to_string(), 2),
            ]
        );
    }

    #[test]
    fn scoped_keys_omit_the_project() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);

        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("proj"), &dir, false).unwrap();
        bucket.set_entry_value(&p("/proj/a.txt"), Some(1));
        bucket.save().unwrap();

        let bytes = fs::read(dir.join(Counter::FILE_NAME)).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/a.txt"));
        assert!(!text.contains("proj"));

        // The same file read under another scope relocates the entries.
        let mut moved = Bucket::new(Counter);
        moved.load(Some("other"), &dir, false).unwrap();
        assert_eq!(moved.get(&p("/other/a.txt")), Some(&1));
    }

    #[test]
    fn second_save_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);
        let mut bucket = Bucket::new(Counter);
        bucket.load(None, &dir, false).unwrap();
        bucket.set_entry_value(&p("/"), Some(5));
        bucket.save().unwrap();

        let file = dir.join(Counter::FILE_NAME);
        fs::remove_file(&file).unwrap();
        bucket.save().unwrap();
        assert!(!file.exists(), "clean bucket must not be rewritten");
    }

    #[test]
    fn version_mismatch_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(Counter::FILE_NAME), [1u8, 0, 0, 0, 0]).unwrap();

        let mut bucket = Bucket::new(Counter);
        match bucket.load(None, &dir, false) {
            Err(IndexError::FormatVersionMismatch { expected, found, .. }) => {
                assert_eq!(expected, 9);
                assert_eq!(found, 1);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
        assert!(bucket.location().is_none());
    }

    #[test]
    fn unreadable_file_is_never_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join(Counter::FILE_NAME);
        let foreign = [1u8, 0, 0, 0, 0];
        fs::write(&file, foreign).unwrap();

        let mut bucket = Bucket::new(Counter);
        let err = bucket.load(None, &dir, false).unwrap_err();
        assert!(err.is_unreadable_bucket());
        bucket.set_entry_value(&p("/"), Some(7));
        bucket.save().unwrap();
        assert_eq!(fs::read(&file).unwrap(), foreign);

        // Loading again retries the file instead of reusing the detached state.
        assert!(bucket.load(None, &dir, false).is_err());
    }

    #[test]
    fn emptied_bucket_removes_file_and_empty_shards() {
        let tmp = tempfile::tempdir().unwrap();
        let root = index_dir(&tmp);
        let dir = root.join("0a").join("ff");

        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("proj"), &dir, false).unwrap();
        bucket.set_entry_value(&p("/proj/x/y/z.txt"), Some(1));
        bucket.save().unwrap();
        assert!(dir.join(Counter::FILE_NAME).is_file());

        bucket.set_entry_value(&p("/proj/x/y/z.txt"), None);
        bucket.save().unwrap();
        assert!(!root.join("0a").exists());
        assert!(root.is_dir(), "the .indexes root survives");
    }

    #[test]
    fn load_saves_the_resident_bucket_first() {
        let tmp = tempfile::tempdir().unwrap();
        let first = index_dir(&tmp).join("01");
        let second = index_dir(&tmp).join("02");

        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("proj"), &first, false).unwrap();
        bucket.set_entry_value(&p("/proj/a/b.txt"), Some(7));
        bucket.load(Some("proj"), &second, false).unwrap();
        assert_eq!(bucket.entry_count(), 0);
        assert!(first.join(Counter::FILE_NAME).is_file());
    }

    #[test]
    fn accept_filters_by_prefix_and_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("p"), &index_dir(&tmp), false).unwrap();
        for (path, v) in [("/p", 1), ("/p/a", 2), ("/p/a/b", 3), ("/p/c", 4), ("/p/ab", 5)] {
            bucket.set_entry_value(&p(path), Some(v));
        }

        let mut seen = Vec::new();
        let mut visitor = |path: &ResourcePath, _: &u32| -> IndexResult<Visit<u32>> {
            seen.push(path.to_string());
            Ok(Visit::proceed())
        };
        bucket.accept(&mut visitor, &p("/p/a"), 0).unwrap();
        assert_eq!(seen, vec!["/p/a"]);

        seen.clear();
        let mut visitor = |path: &ResourcePath, _: &u32| -> IndexResult<Visit<u32>> {
            seen.push(path.to_string());
            Ok(Visit::proceed())
        };
        bucket.accept(&mut visitor, &p("/p"), 1).unwrap();
        assert_eq!(seen, vec!["/p", "/p/a", "/p/ab", "/p/c"]);
    }

    #[test]
    fn accept_applies_actions_and_compaction() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);
        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("p"), &dir, false).unwrap();
        for (path, v) in [("/p/a", 1), ("/p/b", 2), ("/p/c", 3)] {
            bucket.set_entry_value(&p(path), Some(v));
        }
        bucket.save().unwrap();

        let mut visitor = |path: &ResourcePath, v: &u32| -> IndexResult<Visit<u32>> {
            Ok(Visit::apply(match path.last_segment() {
                Some("a") => EntryAction::Delete,
                Some("b") => EntryAction::Mutate(v * 10),
                // Compacts to nothing.
                _ => EntryAction::Mutate(0),
            }))
        };
        let flow = bucket.accept(&mut visitor, &p("/p"), usize::MAX).unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(!bucket.is_dirty(), "accept saves at the end");

        let mut reloaded = Bucket::new(Counter);
        reloaded.load(Some("p"), &dir, false).unwrap();
        assert_eq!(reloaded.entry_count(), 1);
        assert_eq!(reloaded.get(&p("/p/b")), Some(&20));
    }

    #[test]
    fn stop_halts_and_hooks_run_once() {
        struct Halting {
            visited: usize,
            before: usize,
            after: usize,
        }
        impl BucketVisitor<u32> for Halting {
            fn visit(&mut self, _: &ResourcePath, _: &u32) -> IndexResult<Visit<u32>> {
                self.visited += 1;
                Ok(Visit::new(EntryAction::Delete, Flow::Stop))
            }
            fn before_saving(&mut self, _: Option<&Path>) -> IndexResult<()> {
                self.before += 1;
                Ok(())
            }
            fn after_saving(&mut self, _: Option<&Path>) -> IndexResult<()> {
                self.after += 1;
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("p"), &index_dir(&tmp), false).unwrap();
        bucket.set_entry_value(&p("/p/a"), Some(1));
        bucket.set_entry_value(&p("/p/b"), Some(2));

        let mut visitor = Halting { visited: 0, before: 0, after: 0 };
        let flow = bucket.accept(&mut visitor, &p("/"), usize::MAX).unwrap();
        assert_eq!(flow, Flow::Stop);
        assert_eq!(visitor.visited, 1);
        assert_eq!((visitor.before, visitor.after), (1, 1));
        assert_eq!(bucket.entry_count(), 1);
    }

    #[test]
    fn visitor_error_still_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = index_dir(&tmp);
        let mut bucket = Bucket::new(Counter);
        bucket.load(Some("p"), &dir, false).unwrap();
        bucket.set_entry_value(&p("/p/a"), Some(1));

        let mut visitor = |_: &ResourcePath, _: &u32| -> IndexResult<Visit<u32>> {
            Err(IndexError::Io(io::Error::new(io::ErrorKind::Other, "boom")))
        };
        assert!(bucket.accept(&mut visitor, &p("/p"), usize::MAX).is_err());
        assert!(dir.join(Counter::FILE_NAME).is_file());
    }
}
