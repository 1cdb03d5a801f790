//! Listener types for the store boundary.
//!
//! A listener is one occupied remote listener slot: a path plus the callback
//! that receives its snapshots.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::path::Path;
use super::snapshot::Snapshot;

/// Callback invoked with each snapshot a listener receives.
pub type OnSnapshot = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Unique identifier for a listener slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// A registered listener.
pub struct Listener {
    id: ListenerId,
    path: Path,
    on_snapshot: OnSnapshot,
    /// Fires once and then vacates its slot.
    once: bool,
}

impl Listener {
    pub fn new(path: Path, on_snapshot: OnSnapshot, once: bool) -> Self {
        Self {
            id: ListenerId::new(),
            path,
            on_snapshot,
            once,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    /// A shared reference to the callback, for delivering outside any lock.
    pub fn callback(&self) -> OnSnapshot {
        Arc::clone(&self.on_snapshot)
    }

    /// Deliver a snapshot directly.
    pub fn notify(&self, snapshot: Snapshot) {
        (self.on_snapshot)(snapshot);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("once", &self.once)
            .finish()
    }
}
