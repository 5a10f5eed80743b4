use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use strata_types::BlobId;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::shard::ShardMap;

/// File-system blob store.
///
/// Layout:
/// ```text
/// <root>/<2-hex-digit shard>/<32-hex-digit blob id>
/// ```
///
/// Blobs are written to a temporary file in their shard directory and
/// renamed into place, so a reader never observes a partial blob. Deletion
/// is best-effort: failures are logged and swallowed.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
    shards: ShardMap,
}

impl BlobStore {
    /// Open (or create) a blob store rooted at `root` with `limit` shards.
    pub fn open(root: impl AsRef<Path>, limit: usize) -> StoreResult<Self> {
        let shards = ShardMap::new(limit)?;
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, shards })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The shard map in use.
    pub fn shard_map(&self) -> ShardMap {
        self.shards
    }

    /// Shard directory that holds (or would hold) `id`.
    pub fn folder_for(&self, id: &BlobId) -> PathBuf {
        self.root.join(self.shards.dir_name(id))
    }

    /// Full path of the blob file for `id`.
    pub fn file_for(&self, id: &BlobId) -> PathBuf {
        self.folder_for(id).join(id.to_hex())
    }

    /// Store `data` as a new blob.
    pub fn put_bytes(&self, data: &[u8]) -> StoreResult<BlobId> {
        let id = BlobId::generate();
        let mut temp = self.temp_file_for(&id)?;
        temp.write_all(data)?;
        self.persist(temp, &id)?;
        debug!(blob = %id, len = data.len(), "stored blob");
        Ok(id)
    }

    /// Store the contents of the file at `source` as a new blob.
    ///
    /// With `move_contents` the source file is consumed: it is renamed into
    /// the store when possible, or copied and then removed.
    pub fn put_file(&self, source: &Path, move_contents: bool) -> StoreResult<BlobId> {
        let id = BlobId::generate();
        let destination = self.file_for(&id);

        if move_contents {
            fs::create_dir_all(self.folder_for(&id))?;
            match fs::rename(source, &destination) {
                Ok(()) => {
                    debug!(blob = %id, source = %source.display(), "moved file into blob store");
                    return Ok(id);
                }
                // Typically a cross-device rename; fall back to copying.
                Err(e) => debug!(error = %e, "rename into blob store failed; copying"),
            }
        }

        let mut input = File::open(source)?;
        let mut temp = self.temp_file_for(&id)?;
        io::copy(&mut input, &mut temp)?;
        drop(input);
        self.persist(temp, &id)?;

        if move_contents {
            if let Err(e) = fs::remove_file(source) {
                warn!(source = %source.display(), error = %e, "could not remove moved source");
            }
        }
        debug!(blob = %id, source = %source.display(), "copied file into blob store");
        Ok(id)
    }

    /// Open a blob for reading.
    pub fn get(&self, id: &BlobId) -> StoreResult<File> {
        File::open(self.file_for(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(*id),
            _ => StoreError::Io(e),
        })
    }

    /// Read a whole blob into memory.
    pub fn read(&self, id: &BlobId) -> StoreResult<Vec<u8>> {
        let mut data = Vec::new();
        self.get(id)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Returns `true` if the blob file is present.
    pub fn exists(&self, id: &BlobId) -> bool {
        self.file_for(id).is_file()
    }

    /// Delete a blob. Returns `true` if a file was removed.
    ///
    /// Never fails: a blob that is already gone, or cannot be removed, is
    /// logged and otherwise ignored.
    pub fn delete(&self, id: &BlobId) -> bool {
        remove_blob_file(&self.file_for(id), id)
    }

    /// Delete many blobs, visiting each shard directory once.
    ///
    /// Returns the number of blob files actually removed.
    pub fn delete_many<'a>(&self, ids: impl IntoIterator<Item = &'a BlobId>) -> usize {
        let mut by_shard: BTreeMap<String, Vec<&BlobId>> = BTreeMap::new();
        for id in ids {
            by_shard.entry(self.shards.dir_name(id)).or_default().push(id);
        }

        let mut removed = 0;
        for (shard, ids) in by_shard {
            let folder = self.root.join(&shard);
            if !folder.is_dir() {
                debug!(shard = %shard, count = ids.len(), "shard directory missing; nothing to delete");
                continue;
            }
            for id in ids {
                if remove_blob_file(&folder.join(id.to_hex()), id) {
                    removed += 1;
                }
            }
        }
        debug!(removed, "batched blob deletion");
        removed
    }

    /// Enumerate every blob currently stored.
    ///
    /// Entries that are not blob files (stray temporaries, foreign files)
    /// are skipped.
    pub fn all_ids(&self) -> StoreResult<Vec<BlobId>> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let in_shard = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(|n| self.shards.is_shard_name(n))
                .unwrap_or(false);
            if !in_shard {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| BlobId::from_hex(name).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn temp_file_for(&self, id: &BlobId) -> StoreResult<NamedTempFile> {
        let folder = self.folder_for(id);
        fs::create_dir_all(&folder)?;
        Ok(NamedTempFile::new_in(folder)?)
    }

    fn persist(&self, temp: NamedTempFile, id: &BlobId) -> StoreResult<()> {
        temp.as_file().sync_all()?;
        temp.persist(self.file_for(id)).map_err(|e| e.error)?;
        Ok(())
    }
}

fn remove_blob_file(path: &Path, id: &BlobId) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(blob = %id, "blob already deleted");
            false
        }
        Err(e) => {
            warn!(blob = %id, error = %e, "failed to delete blob");
            false
        }
    }
}
