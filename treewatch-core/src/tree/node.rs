//! Tree Nodes
//!
//! One [`Node`] exists per live watch. It records where the node sits, which
//! effect it runs, and the one piece of mutable state the engine needs: the
//! current generation of whatever the effect built from the latest snapshot.
//!
//! Emissions go through a per-node mailbox. Whoever finds the mailbox idle
//! drains it; anyone arriving while it is being drained (a re-entrant
//! delivery from inside an effect, or another thread) only enqueues. A node
//! therefore processes snapshots strictly in arrival order and never runs two
//! builds at once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::reactive::{Cleanup, Effect, SubscriptionHandle};
use crate::store::{Path, Snapshot};

/// Unique identifier for a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// How a node listens to its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Re-run on every change until disposed.
    #[default]
    Live,
    /// Run once for the value at establishment.
    Once,
}

#[derive(Default)]
struct Mailbox {
    queue: VecDeque<Snapshot>,
    draining: bool,
}

/// A watched node.
pub(crate) struct Node {
    id: NodeId,
    path: Path,
    depth: usize,
    mode: WatchMode,
    effect: Effect,

    disposed: AtomicBool,

    /// Number of generations started so far.
    generations: AtomicU64,

    /// Cleanup for everything built from the latest snapshot.
    generation: Mutex<Option<Cleanup>>,

    /// The store listener feeding this node.
    listener: Mutex<Option<SubscriptionHandle>>,

    mailbox: Mutex<Mailbox>,
}

impl Node {
    pub fn new(path: Path, depth: usize, mode: WatchMode, effect: Effect) -> Self {
        Self {
            id: NodeId::new(),
            path,
            depth,
            mode,
            effect,
            disposed: AtomicBool::new(false),
            generations: AtomicU64::new(0),
            generation: Mutex::new(None),
            listener: Mutex::new(None),
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of the generation currently built (zero before the first).
    pub fn generation_number(&self) -> u64 {
        self.generations.load(Ordering::Acquire)
    }

    /// Start a new generation and return its number.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Queue a snapshot. Returns true if the caller must drain the mailbox.
    pub fn enqueue(&self, snapshot: Snapshot) -> bool {
        let mut mailbox = self.mailbox.lock();
        mailbox.queue.push_back(snapshot);
        if mailbox.draining {
            return false;
        }
        mailbox.draining = true;
        true
    }

    /// Next queued snapshot. Returning `None` ends the drain.
    pub fn next_snapshot(&self) -> Option<Snapshot> {
        let mut mailbox = self.mailbox.lock();
        let next = mailbox.queue.pop_front();
        if next.is_none() {
            mailbox.draining = false;
        }
        next
    }

    pub fn take_generation(&self) -> Option<Cleanup> {
        self.generation.lock().take()
    }

    /// Store a freshly built generation.
    ///
    /// If the node was disposed while the generation was being built, the
    /// cleanup is handed back for the caller to dispose.
    pub fn install_generation(&self, cleanup: Cleanup) -> Result<(), Cleanup> {
        let previous = {
            let mut slot = self.generation.lock();
            if self.is_disposed() {
                return Err(cleanup);
            }
            slot.replace(cleanup)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
        Ok(())
    }

    /// Keep the store listener for later release. If the node is already
    /// disposed the listener is released now.
    pub fn attach_listener(&self, listener: SubscriptionHandle) {
        {
            let mut slot = self.listener.lock();
            if !self.is_disposed() {
                *slot = Some(listener);
                return;
            }
        }
        listener.dispose();
    }

    /// Mark the node disposed and drop anything still queued.
    ///
    /// Returns false if the node was already disposed.
    pub fn mark_disposed(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.mailbox.lock().queue.clear();
        true
    }

    /// Release the store listener, if attached.
    pub fn release_listener(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.dispose();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("mode", &self.mode)
            .field("generation", &self.generation_number())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
