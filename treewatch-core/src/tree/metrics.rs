//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every node of one [`EffectTree`](super::EffectTree).
#[derive(Debug, Default)]
pub struct TreeMetrics {
    nodes_opened: AtomicU64,
    nodes_closed: AtomicU64,
    generations_built: AtomicU64,
    generations_disposed: AtomicU64,
    stale_deliveries: AtomicU64,
    malformed_enumerations: AtomicU64,
    failed_children: AtomicU64,
}

/// A point-in-time copy of [`TreeMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub nodes_opened: u64,
    pub nodes_closed: u64,
    pub generations_built: u64,
    pub generations_disposed: u64,
    /// Notifications that arrived after their node was disposed.
    pub stale_deliveries: u64,
    pub malformed_enumerations: u64,
    /// Child watches that could not be established or had invalid keys.
    pub failed_children: u64,
}

impl MetricsSnapshot {
    /// Nodes opened and not yet disposed.
    pub fn live_nodes(&self) -> u64 {
        self.nodes_opened.saturating_sub(self.nodes_closed)
    }

    /// Generations built and not yet disposed.
    pub fn live_generations(&self) -> u64 {
        self.generations_built
            .saturating_sub(self.generations_disposed)
    }
}

impl TreeMetrics {
    pub(crate) fn node_opened(&self) {
        self.nodes_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn node_closed(&self) {
        self.nodes_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn generation_built(&self) {
        self.generations_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn generation_disposed(&self) {
        self.generations_disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_delivery(&self) {
        self.stale_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_enumeration(&self) {
        self.malformed_enumerations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_child(&self) {
        self.failed_children.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            nodes_opened: self.nodes_opened.load(Ordering::Relaxed),
            nodes_closed: self.nodes_closed.load(Ordering::Relaxed),
            generations_built: self.generations_built.load(Ordering::Relaxed),
            generations_disposed: self.generations_disposed.load(Ordering::Relaxed),
            stale_deliveries: self.stale_deliveries.load(Ordering::Relaxed),
            malformed_enumerations: self.malformed_enumerations.load(Ordering::Relaxed),
            failed_children: self.failed_children.load(Ordering::Relaxed),
        }
    }
}
