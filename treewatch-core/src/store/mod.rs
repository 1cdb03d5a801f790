//! Remote Store Boundary
//!
//! The engine never talks to a database directly. It depends on the
//! [`RemoteStore`] capability, which an external collaborator implements over
//! whatever hierarchical store it has. [`MemoryStore`] is an in-process
//! implementation used for tests, demos, and offline tooling.
//!
//! # Contract
//!
//! - `watch` delivers the current value as soon as the listener is
//!   established, then again every time the value changes, until the returned
//!   handle is disposed.
//! - `read_once` delivers exactly one snapshot.
//! - Each open listener occupies one remote listener slot until its handle is
//!   disposed.
//! - A store may still deliver a notification that was in flight when the
//!   handle was disposed. Callers must tolerate that.

mod listener;
mod memory;
mod path;
mod snapshot;

pub use listener::{Listener, ListenerId, OnSnapshot};
pub use memory::{Delivery, MemoryStore};
pub use path::{validate_segment, Path, SEPARATOR};
pub use snapshot::{Payload, Scalar, Snapshot};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, WatchError};
use crate::reactive::SubscriptionHandle;

/// Read and watch access to a hierarchical store.
pub trait RemoteStore: Send + Sync {
    /// Deliver the current value at `path` exactly once.
    ///
    /// Fails with [`WatchError::StoreUnavailable`] if the read cannot be
    /// established. Disposing the handle before delivery cancels the read.
    fn read_once(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle>;

    /// Deliver the value at `path` now and on every change.
    ///
    /// Fails with [`WatchError::StoreUnavailable`] if the listener cannot be
    /// established.
    fn watch(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn read_once(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        (**self).read_once(path, on_snapshot)
    }

    fn watch(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        (**self).watch(path, on_snapshot)
    }
}

/// Await a single snapshot from `store`.
///
/// The read's listener slot is held only until the snapshot arrives or the
/// future is dropped.
pub async fn read_snapshot(store: &dyn RemoteStore, path: &Path) -> Result<Snapshot> {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));

    let handle = store.read_once(
        path,
        Arc::new(move |snapshot: Snapshot| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(snapshot);
            }
        }),
    )?;

    let result = rx
        .await
        .map_err(|_| WatchError::unavailable(path, "read was dropped before a snapshot arrived"));
    handle.dispose();
    result
}
