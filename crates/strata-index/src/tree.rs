use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use strata_types::{Depth, ResourcePath};
use tracing::{debug, warn};

use crate::bucket::{Bucket, BucketVisitor, Flow, INDEXES_DIR_NAME};
use crate::codec::BucketCodec;
use crate::error::{IndexError, IndexResult};

/// Directory holding the workspace root's bucket.
pub const ROOT_DIR_NAME: &str = ".root";
/// Directory holding one sub-directory per project.
pub const PROJECTS_DIR_NAME: &str = ".projects";
/// One-byte format marker written at the root shard on close.
pub const VERSION_FILE_NAME: &str = "version";
/// Largest (and default) fan-out of a bucket shard directory.
pub const MAX_SEGMENT_QUOTA: usize = 256;

static SEGMENT_NAMES: LazyLock<Vec<String>> =
    LazyLock::new(|| (0..MAX_SEGMENT_QUOTA).map(|i| format!("{i:02x}")).collect());

/// Maps every resource path to the bucket of its parent directory and
/// keeps exactly one bucket resident at a time.
///
/// Layout under `base`:
/// ```text
/// .root/.indexes/<file>                           the workspace root
/// .projects/<project>/.indexes/<file>             project and its members
/// .projects/<project>/.indexes/<xx>/.../<file>    deeper members
/// ```
///
/// Each `<xx>` is a hashed name for one intermediate path segment, which
/// bounds directory fan-out to `segment_quota`.
#[derive(Debug)]
pub struct BucketTree<C: BucketCodec> {
    current: Bucket<C>,
    base: PathBuf,
    segment_quota: usize,
    /// Bucket files the last `accept` could not read.
    skipped: Vec<PathBuf>,
}

impl<C: BucketCodec> BucketTree<C> {
    pub fn new(codec: C, base: impl AsRef<Path>, segment_quota: usize) -> IndexResult<Self> {
        if segment_quota == 0 || segment_quota > MAX_SEGMENT_QUOTA || !segment_quota.is_power_of_two() {
            return Err(IndexError::InvalidSegmentQuota(segment_quota));
        }
        Ok(Self {
            current: Bucket::new(codec),
            base: base.as_ref().to_path_buf(),
            segment_quota,
            skipped: Vec::new(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The resident bucket.
    pub fn current(&self) -> &Bucket<C> {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Bucket<C> {
        &mut self.current
    }

    /// The shard root of the workspace root's bucket.
    pub fn root_location(&self) -> PathBuf {
        self.base.join(ROOT_DIR_NAME).join(INDEXES_DIR_NAME)
    }

    /// Metadata directory of a project.
    pub fn project_location(&self, project: &str) -> PathBuf {
        self.base.join(PROJECTS_DIR_NAME).join(project)
    }

    /// Directory of the bucket holding `path`.
    ///
    /// The project segment selects the project's shard root; each segment
    /// after it except the last adds one hashed directory level.
    pub fn location_for(&self, path: &ResourcePath) -> PathBuf {
        let Some(project) = path.project_name() else {
            return self.root_location();
        };
        let mut location = self.project_location(project).join(INDEXES_DIR_NAME);
        let count = path.segment_count();
        for segment in path.segments().take(count.saturating_sub(1)).skip(1) {
            location.push(self.segment_name(segment));
        }
        location
    }

    fn segment_name(&self, segment: &str) -> &'static str {
        let index = segment_hash(segment).unsigned_abs() as usize % self.segment_quota;
        &SEGMENT_NAMES[index]
    }

    /// Make the bucket holding `path` resident.
    pub fn load_bucket_for(&mut self, path: &ResourcePath) -> IndexResult<()> {
        let location = self.location_for(path);
        self.current.load(path.project_name(), &location, false)
    }

    /// Visit every entry at or below `base` within `depth`.
    ///
    /// Buckets whose file cannot be decoded are skipped with a warning and
    /// listed by [`skipped_buckets`](Self::skipped_buckets); the walk goes
    /// on with the others.
    pub fn accept<T>(&mut self, visitor: &mut T, base: &ResourcePath, depth: Depth) -> IndexResult<()>
    where
        T: BucketVisitor<C::Value> + ?Sized,
    {
        self.skipped.clear();
        let depth = depth.limit();
        if !base.is_root() {
            let location = self.location_for(base);
            self.internal_accept(visitor, base, &location, depth, 0)?;
            return Ok(());
        }

        let root = self.root_location();
        if self.load_or_skip(None, &root)? && self.current.accept(visitor, base, 0)? != Flow::Continue {
            return Ok(());
        }
        if depth == 0 {
            return Ok(());
        }
        let depth = depth - 1;
        for project in self.project_names()? {
            let project_path = ResourcePath::project(&project)?;
            let location = self.location_for(&project_path);
            if !self.internal_accept(visitor, &project_path, &location, depth, 1)? {
                break;
            }
        }
        Ok(())
    }

    /// Visit one bucket directory and, depth permitting, its shard
    /// sub-directories. Returns whether sibling directories should still
    /// be visited.
    fn internal_accept<T>(
        &mut self,
        visitor: &mut T,
        base: &ResourcePath,
        dir: &Path,
        depth_requested: usize,
        current_depth: usize,
    ) -> IndexResult<bool>
    where
        T: BucketVisitor<C::Value> + ?Sized,
    {
        if self.load_or_skip(base.project_name(), dir)? {
            match self.current.accept(visitor, base, depth_requested)? {
                Flow::Continue => {}
                Flow::Return => return Ok(true),
                Flow::Stop => return Ok(false),
            }
        }
        if depth_requested <= current_depth {
            return Ok(true);
        }
        for sub in sub_directories(dir)? {
            if !self.internal_accept(visitor, base, &sub, depth_requested, current_depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Load the bucket in `dir`. Returns `false` when its file cannot be
    /// decoded; the bucket is then recorded as skipped.
    fn load_or_skip(&mut self, scope: Option<&str>, dir: &Path) -> IndexResult<bool> {
        match self.current.load(scope, dir, false) {
            Ok(()) => Ok(true),
            Err(e) if e.is_unreadable_bucket() => {
                warn!(bucket = %dir.display(), error = %e, "skipping unreadable bucket");
                self.skipped.push(dir.join(C::FILE_NAME));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Bucket files the last [`accept`](Self::accept) skipped as
    /// unreadable.
    pub fn skipped_buckets(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Names of all projects with an index directory, sorted.
    pub fn project_names(&self) -> IndexResult<Vec<String>> {
        let projects = self.base.join(PROJECTS_DIR_NAME);
        let mut names = Vec::new();
        for dir in sub_directories(&projects)? {
            match dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => names.push(name.to_string()),
                None => warn!(dir = %dir.display(), "skipping project directory with non UTF-8 name"),
            }
        }
        Ok(names)
    }

    /// Relocate a whole project's index from `from` to `to`.
    ///
    /// Keys inside project buckets omit the project name, so renaming the
    /// project directory is enough. Returns `false` (and changes nothing)
    /// when `to` already has an index or `from` has none.
    pub fn move_project(&mut self, from: &str, to: &str) -> IndexResult<bool> {
        self.current.save()?;
        self.current.discard();
        let source = self.project_location(from);
        let target = self.project_location(to);
        if !source.is_dir() || target.exists() {
            return Ok(false);
        }
        fs::rename(&source, &target)?;
        debug!(from, to, "relocated project index");
        Ok(true)
    }

    /// Save the resident bucket.
    pub fn save(&mut self) -> IndexResult<()> {
        self.current.save()
    }

    /// Save the resident bucket and stamp the format version marker.
    pub fn close(&mut self) -> IndexResult<()> {
        self.current.save()?;
        let root = self.root_location();
        fs::create_dir_all(&root)?;
        fs::write(root.join(VERSION_FILE_NAME), [C::VERSION])?;
        debug!(base = %self.base.display(), version = C::VERSION, "closed bucket tree");
        Ok(())
    }

    /// The version byte written by the last [`close`](Self::close), if any.
    pub fn stored_version(&self) -> IndexResult<Option<u8>> {
        match fs::read(self.root_location().join(VERSION_FILE_NAME)) {
            Ok(bytes) => Ok(bytes.first().copied()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Throw away every bucket without saving.
    pub fn reset(&mut self) -> IndexResult<()> {
        self.current.discard();
        for dir in [ROOT_DIR_NAME, PROJECTS_DIR_NAME] {
            match fs::remove_dir_all(self.base.join(dir)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Polynomial (31) hash over the UTF-16 code units of `segment`, with
/// wrapping 32-bit arithmetic.
pub fn segment_hash(segment: &str) -> i32 {
    segment
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Immediate sub-directories of `dir`, sorted. A missing `dir` has none.
fn sub_directories(dir: &Path) -> IndexResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
