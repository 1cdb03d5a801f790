//! Reactive Primitives
//!
//! This module holds the two primitives every watched node is built from:
//! the disposable [`SubscriptionHandle`] and the [`Effect`] a node runs when
//! it emits.
//!
//! # Concepts
//!
//! ## Handles
//!
//! A handle owns one store listener (or nothing) plus every handle spawned
//! while processing that listener's snapshots. Disposal releases children
//! before the listener itself and is idempotent, so a node may be torn down
//! both directly and through an ancestor without harm.
//!
//! ## Effects
//!
//! An effect turns a snapshot into a side effect and returns a [`Cleanup`]
//! that undoes it. Leaf effects stop there; branch effects use the
//! [`Scope`](crate::tree::Scope) they are handed to watch the next level
//! down.

mod effect;
mod handle;

pub use effect::Effect;
pub use handle::{Cleanup, HandleId, SubscriptionHandle};
