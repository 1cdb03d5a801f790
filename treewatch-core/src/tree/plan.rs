//! Declarative tree shapes.
//!
//! A [`TreePlan`] spells out the levels to descend from a starting node,
//! e.g. "a user lists multifrogs, a multifrog lists frogs, a frog lists
//! sensors and, by the same ids, readings". Plans deserialize from JSON:
//!
//! ```json
//! {
//!   "label": "user",
//!   "levels": [
//!     { "label": "multifrog", "enumerate": "multifrogs", "children": [
//!       { "label": "frog", "enumerate": "frogs", "children": [
//!         { "label": "sensor", "enumerate": "sensors" },
//!         { "label": "readings", "enumerate": "sensors",
//!           "root": { "collection": "/readings" } }
//!       ]}
//!     ]}
//!   ]
//! }
//! ```
//!
//! Every visited node is handed to a [`Presenter`] together with its level's
//! label; the presenter's cleanup is disposed after the node's children.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::children::{ChildRoot, ChildSpec};
use super::node::WatchMode;
use crate::error::{Result, WatchError};
use crate::reactive::{Cleanup, Effect};
use crate::store::{Path, Snapshot};

/// The presentation boundary: shows a node, returns how to un-show it.
pub trait Presenter: Send + Sync {
    fn present(&self, label: &str, snapshot: &Snapshot) -> Cleanup;
}

impl<F> Presenter for F
where
    F: Fn(&str, &Snapshot) -> Cleanup + Send + Sync,
{
    fn present(&self, label: &str, snapshot: &Snapshot) -> Cleanup {
        self(label, snapshot)
    }
}

/// One level of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPlan {
    pub label: String,
    /// Field of the parent that lists this level's keys.
    pub enumerate: Path,
    /// Where keys are resolved. Defaults to the top-level collection named
    /// like the enumeration field.
    #[serde(default)]
    pub root: Option<ChildRoot>,
    #[serde(default)]
    pub mode: WatchMode,
    #[serde(default)]
    pub children: Vec<LevelPlan>,
}

impl LevelPlan {
    pub fn child_spec(&self) -> ChildSpec {
        let root = self
            .root
            .clone()
            .unwrap_or_else(|| ChildRoot::Collection(self.enumerate.clone()));
        ChildSpec::nested(self.enumerate.clone())
            .with_root(root)
            .with_mode(self.mode)
    }
}

/// A whole tree shape, starting at the node the plan is watched on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePlan {
    pub label: String,
    #[serde(default)]
    pub levels: Vec<LevelPlan>,
}

impl TreePlan {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(WatchError::Plan)
    }

    /// Build the effect for the plan's starting node.
    pub fn effect(&self, presenter: Arc<dyn Presenter>) -> Effect {
        level_effect(&self.label, &self.levels, presenter)
    }
}

fn level_effect(label: &str, levels: &[LevelPlan], presenter: Arc<dyn Presenter>) -> Effect {
    let label = label.to_string();
    if levels.is_empty() {
        return Effect::leaf(move |snapshot| presenter.present(&label, snapshot));
    }

    let groups: Vec<(ChildSpec, Effect)> = levels
        .iter()
        .map(|level| {
            (
                level.child_spec(),
                level_effect(&level.label, &level.children, Arc::clone(&presenter)),
            )
        })
        .collect();

    Effect::branch(move |snapshot, scope| {
        let mut parts = Vec::with_capacity(groups.len() + 1);
        parts.push(presenter.present(&label, snapshot));
        for (spec, effect) in &groups {
            if scope.is_cancelled() {
                break;
            }
            parts.push(scope.spawn_children(snapshot, spec, effect));
        }
        Cleanup::chain(parts)
    })
}
