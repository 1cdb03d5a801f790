//! Subscription Handles
//!
//! A [`SubscriptionHandle`] is the disposer returned by every watch or read,
//! and doubles as the [`Cleanup`] an effect hands back. It owns at most one
//! release action (usually "remove this store listener") and any number of
//! child handles.
//!
//! # Disposal Order
//!
//! `dispose()` runs in this order:
//!
//! 1. Mark the handle disposed. A second call returns here.
//! 2. Dispose every child, newest first.
//! 3. Run the handle's own release action.
//!
//! Children therefore never outlive their parent's listener. A child that is
//! disposed directly and again through its parent is released once.
//!
//! # Ownership
//!
//! Clones share state. When the last clone is dropped the handle disposes
//! itself, so a forgotten handle cannot leak a listener slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// The value an effect returns: undoes whatever the effect did.
pub type Cleanup = SubscriptionHandle;

type Release = Box<dyn FnOnce() + Send>;

/// Unique identifier for a handle, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

struct HandleInner {
    id: HandleId,
    disposed: AtomicBool,
    release: Mutex<Option<Release>>,
    children: Mutex<Vec<SubscriptionHandle>>,
}

impl HandleInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Take the children out before disposing them; no lock is held while
        // foreign code runs.
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.into_iter().rev() {
            child.dispose();
        }

        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Disposable resource representing an active watch plus everything it
/// spawned.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    fn build(release: Option<Release>, children: Vec<SubscriptionHandle>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: HandleId::next(),
                disposed: AtomicBool::new(false),
                release: Mutex::new(release),
                children: Mutex::new(children),
            }),
        }
    }

    /// A handle that runs `release` once when disposed.
    pub fn from_fn<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(Some(Box::new(release)), Vec::new())
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self::build(None, Vec::new())
    }

    /// Group several handles into one. Disposing the result disposes all of
    /// them; sibling order is not significant.
    pub fn chain<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = SubscriptionHandle>,
    {
        Self::build(None, handles.into_iter().collect())
    }

    /// Make `child` part of this handle's subtree.
    ///
    /// If this handle is already disposed the child is disposed immediately.
    pub fn adopt(&self, child: SubscriptionHandle) {
        {
            let mut children = self.inner.children.lock();
            if !self.inner.disposed.load(Ordering::Acquire) {
                children.push(child);
                return;
            }
        }
        child.dispose();
    }

    /// Release this handle and everything it owns. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// Number of directly owned child handles still attached.
    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .field("children", &self.child_count())
            .finish()
    }
}
