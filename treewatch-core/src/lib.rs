//! Treewatch Core
//!
//! This crate mirrors a remotely hosted, hierarchically keyed store into a
//! tree of live observers. It implements:
//!
//! - A store boundary (paths, snapshots, the [`RemoteStore`] trait) and an
//!   in-process [`MemoryStore`]
//! - Idempotent, composable [`SubscriptionHandle`]s
//! - The recursive [`EffectTree`] engine: watch a node, derive its children
//!   from its own payload, watch each child, repeat
//! - Session-scoped trees that are torn down when the session ends
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: Paths, payloads, snapshots, and the store capability
//! - `reactive`: Handles and effects
//! - `tree`: The engine, child enumeration, and declarative plans
//! - `session`: Rooting a tree at the signed-in session
//!
//! # Example
//!
//! ```rust,ignore
//! use treewatch_core::{ChildSpec, Cleanup, Effect, EffectTree, MemoryStore, Path};
//!
//! let store = MemoryStore::new();
//! let tree = EffectTree::new(store.clone());
//!
//! // Watch every multifrog listed under a user.
//! let handle = tree.watch_children(
//!     &Path::parse("/users/u1")?,
//!     ChildSpec::collection("multifrogs")?,
//!     Effect::leaf(|frog| {
//!         println!("loaded multifrog {:?}", frog.key());
//!         Cleanup::noop()
//!     }),
//! )?;
//!
//! // Later: tears down every watch the call created.
//! handle.dispose();
//! ```

pub mod error;
pub mod reactive;
pub mod session;
pub mod store;
pub mod tree;

pub use error::{Result, WatchError};
pub use reactive::{Cleanup, Effect, SubscriptionHandle};
pub use session::SessionBinding;
pub use store::{read_snapshot, Delivery, MemoryStore, Path, Payload, RemoteStore, Snapshot};
pub use tree::{ChildRoot, ChildSpec, EffectTree, Presenter, Scope, TreeConfig, TreePlan, WatchMode};
