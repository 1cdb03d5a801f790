//! Session-scoped trees.
//!
//! A [`SessionBinding`] roots a tree at `<root>/<session id>` while a session
//! exists and disposes the whole tree when it ends. A change from one session
//! to another disposes the old tree before the new one is watched.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;
use crate::reactive::{Effect, SubscriptionHandle};
use crate::store::Path;
use crate::tree::EffectTree;

struct ActiveSession {
    id: String,
    handle: SubscriptionHandle,
}

/// Keeps one tree alive per signed-in session.
pub struct SessionBinding {
    tree: EffectTree,
    root: Path,
    effect: Effect,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionBinding {
    /// Trees will be rooted at `root/<session id>` and run `effect`.
    pub fn new(tree: EffectTree, root: Path, effect: Effect) -> Self {
        Self {
            tree,
            root,
            effect,
            active: Mutex::new(None),
        }
    }

    /// The id of the session whose tree is live, if any.
    pub fn current(&self) -> Option<String> {
        self.active.lock().as_ref().map(|active| active.id.clone())
    }

    /// React to the current session being `session`.
    ///
    /// Reporting the session that is already live is a no-op. Otherwise the
    /// live tree (if any) is disposed first; then, for `Some(id)`, a new tree
    /// is watched at `root/id`. A failure to establish it is returned and
    /// leaves no tree live.
    pub fn apply(&self, session: Option<&str>) -> Result<()> {
        let previous = {
            let mut active = self.active.lock();
            if active.as_ref().map(|a| a.id.as_str()) == session {
                return Ok(());
            }
            active.take()
        };
        if let Some(previous) = previous {
            previous.handle.dispose();
            info!(session = %previous.id, "session ended, tree disposed");
        }

        let Some(id) = session else {
            return Ok(());
        };
        let path = self.root.child(id)?;
        let handle = self.tree.watch(&path, self.effect.clone())?;
        info!(session = %id, path = %path, "session started");

        let displaced = self.active.lock().replace(ActiveSession {
            id: id.to_string(),
            handle,
        });
        if let Some(displaced) = displaced {
            displaced.handle.dispose();
        }
        Ok(())
    }

    /// Dispose the live tree, if any.
    pub fn end(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            previous.handle.dispose();
            info!(session = %previous.id, "session ended, tree disposed");
        }
    }

    /// Follow a stream of session changes until its sender is dropped, then
    /// end the live session.
    ///
    /// Failures to root a session's tree are logged; the binding keeps
    /// following and tries again on the next change.
    pub async fn follow(&self, mut sessions: watch::Receiver<Option<String>>) {
        let initial = sessions.borrow_and_update().clone();
        self.apply_logged(initial.as_deref());

        while sessions.changed().await.is_ok() {
            let next = sessions.borrow_and_update().clone();
            self.apply_logged(next.as_deref());
        }

        self.end();
    }

    fn apply_logged(&self, session: Option<&str>) {
        if let Err(err) = self.apply(session) {
            warn!(session = ?session, error = %err, "could not root session tree");
        }
    }
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        self.end();
    }
}
