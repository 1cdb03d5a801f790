//! The watch / derive / re-watch loop.
//!
//! [`EffectTree`] watches a node and runs its effect on every emission. When
//! the effect is a branch, it derives child keys from the snapshot and watches
//! each child the same way, so one call mirrors a whole subtree of the store.
//!
//! # Per-emission algorithm
//!
//! 1. Drop the delivery if the node is already disposed (a store may deliver
//!    notifications that were in flight when the handle was disposed).
//! 2. Dispose the previous generation. This tears down every descendant
//!    watch built from the previous snapshot, leaves before parents.
//! 3. Run the effect against the new snapshot and keep its cleanup as the
//!    current generation.
//!
//! Step 2 always finishes before step 3 starts, so two generations of the
//! same node are never alive together. Unchanged child key sets are torn down
//! and rebuilt like any other; the engine does not diff generations.
//!
//! # Failure isolation
//!
//! Failing to establish the top-level watch is returned to the caller. Below
//! that, a malformed enumeration, an invalid key or a failed child watch is
//! logged and skipped; siblings are built and disposed normally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::children::ChildSpec;
use super::metrics::{MetricsSnapshot, TreeMetrics};
use super::node::{Node, NodeId, WatchMode};
use crate::error::{Result, WatchError};
use crate::reactive::{Cleanup, Effect, SubscriptionHandle};
use crate::store::{OnSnapshot, Path, RemoteStore, Snapshot};

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Deepest level a branch effect may descend to. The top-level watch is
    /// depth 0.
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// Mirrors parts of a [`RemoteStore`] into nested, self-disposing watches.
///
/// Clones share the store and the metrics.
#[derive(Clone)]
pub struct EffectTree {
    store: Arc<dyn RemoteStore>,
    config: TreeConfig,
    metrics: Arc<TreeMetrics>,
}

impl EffectTree {
    pub fn new<S>(store: S) -> Self
    where
        S: RemoteStore + 'static,
    {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            config: TreeConfig::default(),
            metrics: Arc::new(TreeMetrics::default()),
        }
    }

    pub fn with_config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Watch `path` and run `effect` on every emission.
    ///
    /// Disposing the returned handle disposes the current generation and then
    /// releases the watch itself.
    pub fn watch(&self, path: &Path, effect: Effect) -> Result<SubscriptionHandle> {
        self.observe(path.clone(), effect, WatchMode::Live, 0)
    }

    /// Read `path` once and run `effect` on the result.
    ///
    /// The effect's cleanup lives until the returned handle is disposed.
    pub fn read(&self, path: &Path, effect: Effect) -> Result<SubscriptionHandle> {
        self.observe(path.clone(), effect, WatchMode::Once, 0)
    }

    /// Watch `parent` and, for every emission, watch each child listed by
    /// `spec`, running `effect` on the children.
    pub fn watch_children(
        &self,
        parent: &Path,
        spec: ChildSpec,
        effect: Effect,
    ) -> Result<SubscriptionHandle> {
        self.watch(parent, fan_out(spec, effect))
    }

    /// Like [`watch_children`](Self::watch_children), but reads the parent
    /// once.
    pub fn read_children(
        &self,
        parent: &Path,
        spec: ChildSpec,
        effect: Effect,
    ) -> Result<SubscriptionHandle> {
        self.read(parent, fan_out(spec, effect))
    }

    fn observe(
        &self,
        path: Path,
        effect: Effect,
        mode: WatchMode,
        depth: usize,
    ) -> Result<SubscriptionHandle> {
        let node = Arc::new(Node::new(path, depth, mode, effect));

        let weak = Arc::downgrade(&node);
        let tree = self.clone();
        let on_snapshot: OnSnapshot = Arc::new(move |snapshot: Snapshot| match weak.upgrade() {
            Some(node) => tree.on_emission(&node, snapshot),
            None => {
                tree.metrics.stale_delivery();
                trace!(path = %snapshot.path(), "delivery for a released node dropped");
            }
        });

        let listener = match mode {
            WatchMode::Live => self.store.watch(node.path(), on_snapshot)?,
            WatchMode::Once => self.store.read_once(node.path(), on_snapshot)?,
        };
        node.attach_listener(listener);
        self.metrics.node_opened();
        debug!(node = %node.id(), path = %node.path(), depth, ?mode, "node opened");

        let metrics = Arc::clone(&self.metrics);
        Ok(SubscriptionHandle::from_fn(move || {
            if !node.mark_disposed() {
                return;
            }
            // Descendants first, then the listener that fed them.
            if let Some(generation) = node.take_generation() {
                generation.dispose();
                metrics.generation_disposed();
            }
            node.release_listener();
            metrics.node_closed();
            debug!(node = %node.id(), path = %node.path(), "node disposed");
        }))
    }

    fn on_emission(&self, node: &Arc<Node>, snapshot: Snapshot) {
        if node.is_disposed() {
            self.metrics.stale_delivery();
            trace!(node = %node.id(), path = %node.path(), "delivery after dispose dropped");
            return;
        }
        if !node.enqueue(snapshot) {
            trace!(node = %node.id(), "emission queued behind a running build");
            return;
        }

        while let Some(snapshot) = node.next_snapshot() {
            if node.is_disposed() {
                self.metrics.stale_delivery();
                continue;
            }
            self.rebuild(node, &snapshot);
        }
    }

    fn rebuild(&self, node: &Arc<Node>, snapshot: &Snapshot) {
        let generation = node.next_generation();

        if let Some(previous) = node.take_generation() {
            previous.dispose();
            self.metrics.generation_disposed();
        }
        if node.is_disposed() {
            return;
        }

        let scope = Scope {
            tree: self,
            node: node.as_ref(),
        };
        let cleanup = node.effect().run(snapshot, &scope);
        self.metrics.generation_built();
        debug!(node = %node.id(), path = %node.path(), generation, "generation built");

        if let Err(cleanup) = node.install_generation(cleanup) {
            // Disposed while building.
            cleanup.dispose();
            self.metrics.generation_disposed();
        }
    }

    fn descend(
        &self,
        node: &Node,
        path: Path,
        effect: Effect,
        mode: WatchMode,
    ) -> Result<SubscriptionHandle> {
        let depth = node.depth() + 1;
        if depth > self.config.max_depth {
            return Err(WatchError::DepthExceeded {
                path,
                max_depth: self.config.max_depth,
            });
        }
        self.observe(path, effect, mode, depth)
    }

    fn spawn_children(
        &self,
        node: &Node,
        parent: &Snapshot,
        spec: &ChildSpec,
        effect: &Effect,
    ) -> Cleanup {
        let keys = match parent.child_keys(spec.enumerate()) {
            Ok(keys) => keys,
            Err(err) => {
                self.metrics.malformed_enumeration();
                warn!(path = %parent.path(), error = %err, "treating malformed enumeration as a leaf");
                return Cleanup::noop();
            }
        };

        let root = spec.root_for(parent.path());
        let mut children = Vec::with_capacity(keys.len());

        for key in keys {
            if node.is_disposed() {
                debug!(path = %parent.path(), "parent disposed while building; remaining children skipped");
                break;
            }

            let path = match root.child(&key) {
                Ok(path) => path,
                Err(err) => {
                    self.metrics.failed_child();
                    warn!(parent = %parent.path(), error = %err, "skipping child with an invalid key");
                    continue;
                }
            };

            match self.descend(node, path, effect.clone(), spec.mode()) {
                Ok(handle) => children.push(handle),
                Err(err) => {
                    self.metrics.failed_child();
                    warn!(parent = %parent.path(), error = %err, "child watch failed; siblings unaffected");
                }
            }
        }

        Cleanup::chain(children)
    }
}

impl std::fmt::Debug for EffectTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectTree")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

fn fan_out(spec: ChildSpec, effect: Effect) -> Effect {
    Effect::branch(move |snapshot, scope| scope.spawn_children(snapshot, &spec, &effect))
}

/// What a branch effect can do while handling one emission of its node.
///
/// Everything opened through a scope sits one level below the node, and is
/// skipped once the node has been disposed.
pub struct Scope<'a> {
    tree: &'a EffectTree,
    node: &'a Node,
}

impl<'a> Scope<'a> {
    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Path of the node being handled.
    pub fn path(&self) -> &Path {
        self.node.path()
    }

    /// Depth of the node being handled (the top-level watch is 0).
    pub fn depth(&self) -> usize {
        self.node.depth()
    }

    /// Generation being built, starting at 1.
    pub fn generation(&self) -> u64 {
        self.node.generation_number()
    }

    /// True once the node has been disposed; nothing more should be built.
    pub fn is_cancelled(&self) -> bool {
        self.node.is_disposed()
    }

    pub fn tree(&self) -> &EffectTree {
        self.tree
    }

    /// Watch `path` one level below this node.
    pub fn watch(&self, path: &Path, effect: Effect) -> Result<SubscriptionHandle> {
        self.open(path, effect, WatchMode::Live)
    }

    /// Read `path` once, one level below this node.
    pub fn read(&self, path: &Path, effect: Effect) -> Result<SubscriptionHandle> {
        self.open(path, effect, WatchMode::Once)
    }

    fn open(&self, path: &Path, effect: Effect, mode: WatchMode) -> Result<SubscriptionHandle> {
        if self.is_cancelled() {
            let handle = SubscriptionHandle::noop();
            handle.dispose();
            return Ok(handle);
        }
        self.tree.descend(self.node, path.clone(), effect, mode)
    }

    /// Watch every child `spec` enumerates in `parent`, running `effect` on
    /// each. Returns one cleanup for the whole group.
    pub fn spawn_children(&self, parent: &Snapshot, spec: &ChildSpec, effect: &Effect) -> Cleanup {
        self.tree.spawn_children(self.node, parent, spec, effect)
    }
}
