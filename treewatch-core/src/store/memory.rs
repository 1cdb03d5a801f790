//! In-process store.
//!
//! [`MemoryStore`] keeps a single payload tree and behaves like the remote
//! store the engine is written against: listeners get the current value on
//! establishment and a fresh snapshot whenever the value at their path
//! actually changes. It also counts listener slots, so leaks are observable,
//! and can be told to fail establishment.
//!
//! # Delivery order
//!
//! Notifications enter a single outbox while the write (or listener
//! registration) that caused them still holds the data lock, so the outbox
//! order is the order in which values changed. One caller at a time drains
//! it. A caller that finds a drain running, whether a callback writing to
//! the store re-entrantly or another thread, only enqueues; the running
//! drain delivers its notifications after the ones already queued.
//!
//! With [`Delivery::Queued`] nothing is drained until [`MemoryStore::flush`].
//! Notifications are delivered even if their listener was released after
//! they were queued, which is how a remote store behaves when a notification
//! is already in flight.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::listener::{Listener, ListenerId, OnSnapshot};
use super::path::Path;
use super::snapshot::{Payload, Snapshot};
use super::RemoteStore;
use crate::error::{Result, WatchError};
use crate::reactive::SubscriptionHandle;

/// When notifications reach their callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Before the call that caused them returns, unless a drain is already
    /// running, in which case that drain delivers them.
    #[default]
    Immediate,
    /// On the next [`MemoryStore::flush`].
    Queued,
}

struct Slot {
    listener: Listener,
    /// Last value delivered, for change detection.
    last: Payload,
}

struct Notification {
    listener: ListenerId,
    once: bool,
    callback: OnSnapshot,
    snapshot: Snapshot,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notification>,
    draining: bool,
}

struct StoreInner {
    data: RwLock<Payload>,
    slots: DashMap<ListenerId, Slot>,
    outbox: Mutex<Outbox>,
    delivery: Delivery,
    offline: AtomicBool,
    failing: RwLock<HashSet<Path>>,
    opened: AtomicU64,
}

/// An in-process [`RemoteStore`].
///
/// Clones share the same data and listeners.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// An empty store with immediate delivery.
    pub fn new() -> Self {
        Self::with_delivery(Delivery::Immediate)
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(Payload::Null),
                slots: DashMap::new(),
                outbox: Mutex::new(Outbox::default()),
                delivery,
                offline: AtomicBool::new(false),
                failing: RwLock::new(HashSet::new()),
                opened: AtomicU64::new(0),
            }),
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.inner.delivery
    }

    /// Write `value` at `path` and notify every listener whose value changed.
    pub fn set(&self, path: &Path, value: impl Into<Payload>) {
        {
            let mut data = self.inner.data.write();
            data.insert(path, value.into());
            let notes = self.collect_changes(&data, path);
            self.inner.outbox.lock().queue.extend(notes);
        }
        self.dispatch();
    }

    /// Delete the node at `path`.
    pub fn remove(&self, path: &Path) {
        self.set(path, Payload::Null);
    }

    /// The current value at `path`.
    pub fn value_at(&self, path: &Path) -> Payload {
        self.inner.data.read().get(path).clone()
    }

    /// Number of occupied listener slots.
    pub fn listener_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of occupied listener slots at exactly `path`.
    pub fn listeners_at(&self, path: &Path) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| slot.listener.path() == path)
            .count()
    }

    /// Total listeners ever opened.
    pub fn opened_count(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// While offline every read and watch fails to establish.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Make reads and watches at or below `path` fail to establish.
    pub fn fail_path(&self, path: &Path) {
        self.inner.failing.write().insert(path.clone());
    }

    pub fn restore_path(&self, path: &Path) {
        self.inner.failing.write().remove(path);
    }

    /// Notifications waiting for [`flush`](Self::flush).
    pub fn pending(&self) -> usize {
        self.inner.outbox.lock().queue.len()
    }

    /// Deliver queued notifications, including any queued by the callbacks
    /// themselves. Returns how many were delivered; zero when called while a
    /// drain is already running.
    pub fn flush(&self) -> usize {
        self.drain()
    }

    fn check_available(&self, path: &Path) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(WatchError::unavailable(path, "store is offline"));
        }
        if self
            .inner
            .failing
            .read()
            .iter()
            .any(|failing| path.starts_with(failing))
        {
            return Err(WatchError::unavailable(path, "permission denied"));
        }
        Ok(())
    }

    fn open(&self, path: &Path, on_snapshot: OnSnapshot, once: bool) -> Result<SubscriptionHandle> {
        self.check_available(path)?;

        let listener = Listener::new(path.clone(), on_snapshot, once);
        let id = listener.id();
        {
            // Under the data lock, so no write can slip between the initial
            // value and the first change notification.
            let data = self.inner.data.read();
            let value = data.get(path).clone();
            let note = Notification {
                listener: id,
                once,
                callback: listener.callback(),
                snapshot: Snapshot::new(path.clone(), value.clone()),
            };
            self.inner.slots.insert(id, Slot { listener, last: value });
            self.inner.outbox.lock().queue.push_back(note);
        }
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        debug!(listener = %id, path = %path, once, "listener opened");

        self.dispatch();

        let weak = Arc::downgrade(&self.inner);
        let path = path.clone();
        Ok(SubscriptionHandle::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.slots.remove(&id).is_some() {
                    debug!(listener = %id, path = %path, "listener released");
                }
            }
        }))
    }

    /// Snapshots for every live listener whose value changed after a write at
    /// `changed`, ancestors first.
    fn collect_changes(&self, data: &Payload, changed: &Path) -> Vec<Notification> {
        let mut notes = Vec::new();

        for mut slot in self.inner.slots.iter_mut() {
            if slot.listener.is_once() || !slot.listener.path().overlaps(changed) {
                continue;
            }
            let current = data.get(slot.listener.path());
            if *current == slot.last {
                continue;
            }
            slot.last = current.clone();
            notes.push(Notification {
                listener: slot.listener.id(),
                once: false,
                callback: slot.listener.callback(),
                snapshot: Snapshot::new(slot.listener.path().clone(), current.clone()),
            });
        }

        notes.sort_by_key(|note| note.snapshot.path().len());
        notes
    }

    fn dispatch(&self) {
        if self.inner.delivery == Delivery::Immediate {
            self.drain();
        }
    }

    /// Deliver from the outbox until it is empty, unless another caller is
    /// already doing so.
    fn drain(&self) -> usize {
        {
            let mut outbox = self.inner.outbox.lock();
            if outbox.draining {
                return 0;
            }
            outbox.draining = true;
        }

        let mut delivered = 0;
        loop {
            let next = {
                let mut outbox = self.inner.outbox.lock();
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            let Some(note) = next else {
                break;
            };
            self.deliver(note);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&self, note: Notification) {
        if note.once {
            self.inner.slots.remove(&note.listener);
        }
        (note.callback)(note.snapshot);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn read_once(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        self.open(path, on_snapshot, true)
    }

    fn watch(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        self.open(path, on_snapshot, false)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("delivery", &self.inner.delivery)
            .field("listeners", &self.listener_count())
            .field("pending", &self.pending())
            .finish()
    }
}
