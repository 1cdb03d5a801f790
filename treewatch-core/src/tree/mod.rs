//! Effect Tree
//!
//! This module implements the recursive engine that mirrors a slice of the
//! store into nested watches.
//!
//! # Overview
//!
//! Each watched node runs an [`Effect`](crate::reactive::Effect) on every
//! emission. A branch effect enumerates child keys out of the node's own
//! snapshot and watches each child, which may in turn do the same. The
//! node-to-children relationship is never stored separately: it is re-derived
//! from every snapshot, and the previous derivation (a "generation") is
//! disposed before the next one is built.
//!
//! # Design Decisions
//!
//! 1. Every node keeps exactly one piece of mutable state, its current
//!    generation, written only by its own emission handler.
//!
//! 2. Generations are rebuilt wholesale. A parent emission that leaves the
//!    child key set unchanged still disposes and re-creates every child watch.
//!
//! 3. Child failures are local: they are logged, counted in
//!    [`MetricsSnapshot`], and never stop siblings from being built or
//!    disposed.

mod children;
mod engine;
mod metrics;
mod node;
mod plan;

pub use children::{ChildRoot, ChildSpec};
pub use engine::{EffectTree, Scope, TreeConfig};
pub use metrics::{MetricsSnapshot, TreeMetrics};
pub use node::{NodeId, WatchMode};
pub use plan::{LevelPlan, Presenter, TreePlan};
