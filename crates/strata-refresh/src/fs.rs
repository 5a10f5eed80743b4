use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use strata_types::to_millis;
use tracing::warn;

use crate::stat::FileStat;

/// File system queries needed by the unified tree.
pub trait FileSystemStat {
    /// Stat `path`, following symbolic links. Missing means [`FileStat::NONE`].
    fn stat(&self, path: &Path) -> FileStat;

    /// Names of the entries of directory `dir`, sorted. A missing
    /// directory has no entries.
    fn list(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Canonical target of `path` if it is a symbolic link.
    fn resolve_link(&self, _path: &Path) -> Option<PathBuf> {
        None
    }

    /// Canonical form of `path`, with every link resolved.
    fn canonical(&self, _path: &Path) -> Option<PathBuf> {
        None
    }
}

/// How a platform marks a file read-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOnlyRule {
    /// No write permission bit set for anyone.
    NoWriteBits,
    /// The platform's read-only attribute.
    Attribute,
}

/// [`FileSystemStat`] over the local disk.
#[derive(Clone, Copy, Debug)]
pub struct LocalFileSystem {
    read_only: ReadOnlyRule,
}

impl LocalFileSystem {
    pub fn new(read_only: ReadOnlyRule) -> Self {
        Self { read_only }
    }

    fn is_read_only(&self, meta: &Metadata) -> bool {
        match self.read_only {
            #[cfg(unix)]
            ReadOnlyRule::NoWriteBits => {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() & 0o222 == 0
            }
            #[cfg(not(unix))]
            ReadOnlyRule::NoWriteBits => meta.permissions().readonly(),
            ReadOnlyRule::Attribute => meta.permissions().readonly(),
        }
    }
}

/// The local file system, configured for the platform we run on.
pub fn platform_file_system() -> LocalFileSystem {
    if cfg!(unix) {
        LocalFileSystem::new(ReadOnlyRule::NoWriteBits)
    } else {
        LocalFileSystem::new(ReadOnlyRule::Attribute)
    }
}

impl FileSystemStat for LocalFileSystem {
    fn stat(&self, path: &Path) -> FileStat {
        let Ok(meta) = fs::metadata(path) else {
            return FileStat::NONE;
        };
        let modified = meta.modified().map(to_millis).unwrap_or(0);
        FileStat::new(meta.is_dir(), self.is_read_only(&meta), modified)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!(dir = %dir.display(), name = ?raw, "skipping entry with non UTF-8 name"),
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve_link(&self, path: &Path) -> Option<PathBuf> {
        let meta = fs::symlink_metadata(path).ok()?;
        if !meta.file_type().is_symlink() {
            return None;
        }
        fs::canonicalize(path).ok()
    }

    fn canonical(&self, path: &Path) -> Option<PathBuf> {
        fs::canonicalize(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_files_and_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let local = platform_file_system();
        let stat = local.stat(&file);
        assert!(stat.is_file());
        assert!(stat.last_modified() > 0);
        assert!(local.stat(tmp.path()).is_folder());
        assert!(!local.stat(&tmp.path().join("missing")).is_valid());
    }

    #[test]
    fn lists_sorted_names() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b", "a", "c.txt"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        fs::create_dir(tmp.path().join("d")).unwrap();
        let local = platform_file_system();
        assert_eq!(local.list(tmp.path()).unwrap(), vec!["a", "b", "c.txt", "d"]);
        assert!(local.list(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn detects_read_only_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("ro.txt");
        fs::write(&file, b"x").unwrap();
        let mut perms = fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).unwrap();

        assert!(platform_file_system().stat(&file).is_read_only());
    }

    #[cfg(unix)]
    #[test]
    fn resolves_symbolic_links() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        fs::create_dir(&target).unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let local = platform_file_system();
        assert_eq!(local.resolve_link(&link), Some(fs::canonicalize(&target).unwrap()));
        assert_eq!(local.resolve_link(&target), None);
        assert!(local.stat(&link).is_folder());
    }
}
