//! Child enumeration.
//!
//! A [`ChildSpec`] says how a parent snapshot turns into child watches: which
//! field of the parent lists the child keys, and under which root each key is
//! looked up.

use serde::{Deserialize, Serialize};

use super::node::WatchMode;
use crate::error::Result;
use crate::store::Path;

/// Where child keys are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildRoot {
    /// Under a fixed root, e.g. ids listed in a user's `multifrogs` field
    /// resolved against the top-level `/multifrogs` collection.
    Collection(Path),
    /// Inline, under the enumeration field of the parent itself.
    Nested,
}

/// How to derive child watches from a parent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    enumerate: Path,
    root: ChildRoot,
    mode: WatchMode,
}

impl ChildSpec {
    /// Enumerate keys at `enumerate` in the parent, watch `root/<key>`.
    pub fn new(enumerate: Path, root: Path) -> Self {
        Self {
            enumerate,
            root: ChildRoot::Collection(root),
            mode: WatchMode::Live,
        }
    }

    /// Enumerate keys at `key` in the parent, watch `/<key>/<child key>`.
    pub fn collection(key: &str) -> Result<Self> {
        let enumerate = Path::parse(key)?;
        Ok(Self::new(enumerate.clone(), enumerate))
    }

    /// Enumerate keys at `enumerate`, watch `<parent>/<enumerate>/<key>`.
    pub fn nested(enumerate: Path) -> Self {
        Self {
            enumerate,
            root: ChildRoot::Nested,
            mode: WatchMode::Live,
        }
    }

    pub fn with_root(mut self, root: ChildRoot) -> Self {
        self.root = root;
        self
    }

    pub fn with_mode(mut self, mode: WatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Read each child once instead of watching it.
    pub fn once(self) -> Self {
        self.with_mode(WatchMode::Once)
    }

    pub fn enumerate(&self) -> &Path {
        &self.enumerate
    }

    pub fn root(&self) -> &ChildRoot {
        &self.root
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// The path child keys are appended to, for a parent at `parent`.
    pub fn root_for(&self, parent: &Path) -> Path {
        match &self.root {
            ChildRoot::Collection(root) => root.clone(),
            ChildRoot::Nested => parent.join(&self.enumerate),
        }
    }
}
