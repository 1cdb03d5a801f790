//! Effect Implementation
//!
//! An Effect is the reaction a watched node runs each time it emits a
//! snapshot. Whatever it does, it hands back a [`Cleanup`] that undoes it.
//!
//! # Leaf and Branch
//!
//! - A **leaf** effect is terminal: it turns the snapshot into some external
//!   side effect (a row on screen, a log line) and returns the cleanup that
//!   removes it.
//! - A **branch** effect re-enters the engine one level deeper through the
//!   [`Scope`] it is given, and returns the cleanup of that deeper watch
//!   (possibly chained with side effects of its own).
//!
//! The engine treats both the same way: run on emission, dispose the cleanup
//! before the next run and when the node is torn down. The caller decides the
//! shape of the tree by choosing, at each level, which kind to use.

use std::fmt;
use std::sync::Arc;

use super::handle::Cleanup;
use crate::store::Snapshot;
use crate::tree::Scope;

type LeafFn = dyn Fn(&Snapshot) -> Cleanup + Send + Sync;
type BranchFn = dyn Fn(&Snapshot, &Scope<'_>) -> Cleanup + Send + Sync;

/// A reaction to a node's snapshot.
///
/// Cloning is cheap; clones share the function.
#[derive(Clone)]
pub enum Effect {
    /// Terminal reaction.
    Leaf(Arc<LeafFn>),
    /// Reaction that descends into the engine.
    Branch(Arc<BranchFn>),
}

impl Effect {
    /// Create a leaf effect.
    pub fn leaf<F>(run: F) -> Self
    where
        F: Fn(&Snapshot) -> Cleanup + Send + Sync + 'static,
    {
        Effect::Leaf(Arc::new(run))
    }

    /// Create a branch effect.
    pub fn branch<F>(run: F) -> Self
    where
        F: Fn(&Snapshot, &Scope<'_>) -> Cleanup + Send + Sync + 'static,
    {
        Effect::Branch(Arc::new(run))
    }

    /// A leaf effect that does nothing.
    pub fn noop() -> Self {
        Effect::leaf(|_| Cleanup::noop())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Effect::Leaf(_))
    }

    /// Run the effect for one emission.
    pub(crate) fn run(&self, snapshot: &Snapshot, scope: &Scope<'_>) -> Cleanup {
        match self {
            Effect::Leaf(run) => run(snapshot),
            Effect::Branch(run) => run(snapshot, scope),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Leaf(_) => f.write_str("Effect::Leaf"),
            Effect::Branch(_) => f.write_str("Effect::Branch"),
        }
    }
}
