//! Registry of compilation sessions.
//!
//! A session is an opaque id whose workspace survives between PUT requests
//! so engines can reuse their auxiliary files. Properties:
//! - Ids are random (UUID v4, hex without dashes)
//! - Once known, an id stays known for the lifetime of the process; nothing
//!   is ever evicted
//! - Ids whose directory already exists on disk are adopted lazily, which
//!   is how sessions survive a restart
//! - Each session carries a lock so overlapping compilations queue instead
//!   of racing on the same files

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::workspace::{WorkspaceManager, is_safe_name};

/// Process-wide set of known sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    /// Maps session id -> per-session compile lock.
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new session id and mark it known.
    pub async fn create(&self) -> String {
        let session_id = Uuid::new_v4().simple().to_string();
        self.mark_known(&session_id).await;
        session_id
    }

    /// Record a session id as known.
    pub async fn mark_known(&self, session_id: &str) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default();
    }

    /// Whether `session_id` was issued here or has a directory on disk.
    ///
    /// Ids that are not well formed are never known and never reach the
    /// filesystem.
    pub async fn is_known(&self, session_id: &str, workspaces: &WorkspaceManager) -> bool {
        if !is_safe_name(session_id) {
            return false;
        }

        if self.sessions.read().await.contains_key(session_id) {
            return true;
        }

        if workspaces.session_exists(session_id).await {
            tracing::info!(session = session_id, "Adopting existing session workspace");
            self.mark_known(session_id).await;
            return true;
        }

        false
    }

    /// Wait for exclusive use of a session's workspace.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut sessions = self.sessions.write().await;
            Arc::clone(sessions.entry(session_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of known sessions (for diagnostics).
    pub async fn known_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
