//! Error types for store access and tree construction.

use thiserror::Error;

use crate::store::Path;

/// Main error type for treewatch operations.
///
/// Disposing a handle twice is a no-op, never an error.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A read or watch could not be established at `path`.
    #[error("store unavailable at {path}: {reason}")]
    StoreUnavailable { path: Path, reason: String },

    /// The enumeration field exists but is not map-shaped.
    #[error("enumeration {key} under {path} is not a map")]
    MalformedEnumeration { path: Path, key: Path },

    /// A path segment was empty or contained the separator.
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidSegment {
        segment: String,
        reason: &'static str,
    },

    /// A branch effect tried to descend past the configured depth limit.
    #[error("watch at {path} exceeds the maximum tree depth of {max_depth}")]
    DepthExceeded { path: Path, max_depth: usize },

    /// A snapshot payload did not match the requested type.
    #[error("cannot decode value at {path}: {source}")]
    Decode {
        path: Path,
        #[source]
        source: serde_json::Error,
    },

    /// A tree plan could not be parsed.
    #[error("invalid tree plan: {0}")]
    Plan(#[source] serde_json::Error),
}

impl WatchError {
    /// Shorthand for a `StoreUnavailable` error.
    pub fn unavailable(path: &Path, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            path: path.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for treewatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
