//! Store Paths
//!
//! A path is an ordered sequence of opaque segments. Segments come from
//! untrusted places (user ids, device ids, keys read out of snapshots), so
//! every segment is validated on the way in: it must be non-empty and must not
//! contain the separator. Paths only grow by appending validated segments or
//! joining two valid paths, so a malformed path can never be produced by
//! string surgery.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Result, WatchError};

/// The path separator used in the textual form.
pub const SEPARATOR: char = '/';

/// A location in the remote hierarchy.
///
/// The textual form is `/`-joined with a leading separator; the root path is
/// `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    segments: SmallVec<[String; 4]>,
}

/// Check that a single segment is safe to append.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(WatchError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment is empty",
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(WatchError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment contains the path separator",
        });
    }
    Ok(())
}

impl Path {
    /// The root of the hierarchy.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a textual path such as `/users/abc` or `multifrogs`.
    ///
    /// A single leading and a single trailing separator are accepted. Any
    /// empty segment in between (`a//b`) is rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.strip_prefix(SEPARATOR).unwrap_or(text);
        let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut path = Self::root();
        for segment in trimmed.split(SEPARATOR) {
            validate_segment(segment)?;
            path.segments.push(segment.to_string());
        }
        Ok(path)
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> Result<Self> {
        validate_segment(segment)?;
        let mut path = self.clone();
        path.segments.push(segment.to_string());
        Ok(path)
    }

    /// Return a new path with every segment of `other` appended.
    pub fn join(&self, other: &Path) -> Self {
        let mut path = self.clone();
        path.segments.extend(other.segments.iter().cloned());
        path
    }

    /// The segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path one level up, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut path = self.clone();
        path.segments.pop();
        Some(path)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// True if a change at either path can alter the value seen at the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{SEPARATOR}");
        }
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Path {
    type Error = WatchError;

    fn try_from(text: String) -> Result<Self> {
        Self::parse(&text)
    }
}

impl TryFrom<&str> for Path {
    type Error = WatchError;

    fn try_from(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
