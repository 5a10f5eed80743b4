use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Absolute, workspace-relative path of a resource.
///
/// The first segment names the project; the empty path (`/`) is the
/// workspace root. Segments are never empty, `.` or `..`, so string and
/// segment comparisons agree.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The workspace root (`/`).
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse an absolute path. Repeated and trailing separators are dropped.
    pub fn new(path: &str) -> Result<Self, TypeError> {
        if !path.starts_with('/') {
            return Err(invalid(path, "must start with '/'"));
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in &segments {
            validate_segment(path, segment)?;
        }
        Ok(Self::from_valid_segments(segments))
    }

    /// Path of a top-level project.
    pub fn project(name: &str) -> Result<Self, TypeError> {
        Self::root().join(name)
    }

    fn from_valid_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the workspace root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (0 for the root).
    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// The segment at `index`, if any.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments().nth(index)
    }

    /// The project name (first segment).
    pub fn project_name(&self) -> Option<&str> {
        self.segment(0)
    }

    /// The resource name (last segment).
    pub fn last_segment(&self) -> Option<&str> {
        self.segments().last()
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let count = self.segment_count();
        Some(Self::from_valid_segments(self.segments().take(count - 1)))
    }

    /// Append a single child name.
    pub fn join(&self, name: &str) -> Result<Self, TypeError> {
        if name.contains('/') || name.is_empty() {
            return Err(invalid(name, "not a single segment"));
        }
        validate_segment(name, name)?;
        let mut out = if self.is_root() {
            String::new()
        } else {
            self.0.clone()
        };
        out.push('/');
        out.push_str(name);
        Ok(Self(out))
    }

    /// Number of leading segments shared with `other`.
    pub fn matching_first_segments(&self, other: &ResourcePath) -> usize {
        self.segments()
            .zip(other.segments())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Returns `true` if `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        let count = self.segment_count();
        count <= other.segment_count() && self.matching_first_segments(other) == count
    }

    /// Move this path from under `from` to under `to`.
    ///
    /// Returns `None` if `from` is not a prefix of `self`.
    pub fn rebase(&self, from: &ResourcePath, to: &ResourcePath) -> Option<Self> {
        if !from.is_prefix_of(self) {
            return None;
        }
        let skip = from.segment_count();
        Some(Self::from_valid_segments(
            to.segments().chain(self.segments().skip(skip)),
        ))
    }
}

fn validate_segment(path: &str, segment: &str) -> Result<(), TypeError> {
    if segment == "." || segment == ".." {
        return Err(invalid(path, "relative segments are not allowed"));
    }
    if segment.contains('\0') {
        return Err(invalid(path, "contains a NUL byte"));
    }
    Ok(())
}

fn invalid(path: &str, reason: &str) -> TypeError {
    TypeError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourcePath({})", self.0)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourcePath {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

/// How far below a starting resource an operation reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Depth {
    /// The resource itself.
    Zero,
    /// The resource and its direct members.
    One,
    /// The whole subtree.
    Infinite,
}

impl Depth {
    /// Number of extra trailing segments covered, saturating for `Infinite`.
    pub fn limit(self) -> usize {
        match self {
            Depth::Zero => 0,
            Depth::One => 1,
            Depth::Infinite => usize::MAX,
        }
    }
}

impl FromStr for Depth {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "zero" => Ok(Depth::Zero),
            "1" | "one" => Ok(Depth::One),
            "infinite" | "inf" => Ok(Depth::Infinite),
            other => Err(TypeError::InvalidDepth(other.to_string())),
        }
    }
}
