use std::fmt;

const RESERVED: u64 = 1 << 63;
const VALID: u64 = 1 << 62;
const FOLDER: u64 = 1 << 61;
const READ_ONLY: u64 = 1 << 60;
const LAST_MODIFIED: u64 = !(RESERVED | VALID | FOLDER | READ_ONLY);

/// File system facts about one location, packed into a single word.
///
/// ```text
/// bit 63     reserved
/// bit 62     valid (the location exists)
/// bit 61     folder
/// bit 60     read-only
/// bits 0-59  last modified, ms since the Unix epoch
/// ```
///
/// An invalid stat means "does not exist"; all its other bits are zero.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileStat(u64);

impl FileStat {
    /// Stat of a missing location.
    pub const NONE: FileStat = FileStat(0);

    /// Stat of an existing file or folder. Times before the epoch clamp
    /// to zero.
    pub fn new(is_folder: bool, read_only: bool, last_modified: i64) -> Self {
        let mut bits = VALID | (last_modified.max(0) as u64 & LAST_MODIFIED);
        if is_folder {
            bits |= FOLDER;
        }
        if read_only {
            bits |= READ_ONLY;
        }
        Self(bits)
    }

    pub fn file(last_modified: i64) -> Self {
        Self::new(false, false, last_modified)
    }

    pub fn folder(last_modified: i64) -> Self {
        Self::new(true, false, last_modified)
    }

    pub fn from_raw(bits: u64) -> Self {
        Self(bits & !RESERVED)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 & VALID != 0
    }

    pub fn is_folder(self) -> bool {
        self.0 & FOLDER != 0
    }

    pub fn is_file(self) -> bool {
        self.is_valid() && !self.is_folder()
    }

    pub fn is_read_only(self) -> bool {
        self.0 & READ_ONLY != 0
    }

    pub fn last_modified(self) -> i64 {
        (self.0 & LAST_MODIFIED) as i64
    }
}

impl fmt::Debug for FileStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("FileStat(none)");
        }
        write!(
            f,
            "FileStat({}{}, modified {})",
            if self.is_folder() { "folder" } else { "file" },
            if self.is_read_only() { ", read-only" } else { "" },
            self.last_modified()
        )
    }
}
