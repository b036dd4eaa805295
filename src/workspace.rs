//! Working directories for compilation jobs.
//!
//! Every job runs inside its own directory under a configurable root:
//!
//! ```text
//! <root>/xelatex-job-<uuid>/       transient, removed when the job ends
//! <root>/xelatex-session-<id>/     persistent, reused by a session
//! ```
//!
//! The session naming convention is stable so that sessions created by an
//! earlier process can be adopted after a restart.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{JobError, Result};

const TRANSIENT_PREFIX: &str = "xelatex-job-";
const SESSION_PREFIX: &str = "xelatex-session-";

/// Longest job or session name accepted from a client.
const MAX_NAME_LEN: usize = 64;

/// Whether `name` is usable as a job or session name.
///
/// Names end up in file names, directory names and engine arguments, so
/// only ASCII alphanumerics, `-` and `_` are accepted.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Allocates, resolves and disposes of job directories.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh, uniquely named directory for one job.
    pub async fn allocate_transient(&self) -> Result<TransientWorkspace> {
        let path = self
            .root
            .join(format!("{}{}", TRANSIENT_PREFIX, Uuid::new_v4().simple()));

        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| JobError::io("create workspace", &path, e))?;

        tracing::debug!(workspace = %path.display(), "Allocated transient workspace");
        Ok(TransientWorkspace {
            path,
            disposed: false,
        })
    }

    /// Directory backing `session_id`. Does not touch the filesystem.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", SESSION_PREFIX, session_id))
    }

    /// Whether a directory for `session_id` already exists.
    pub async fn session_exists(&self, session_id: &str) -> bool {
        tokio::fs::metadata(self.session_path(session_id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolve the persistent directory of a session, creating it if absent.
    pub async fn resolve_persistent(&self, session_id: &str) -> Result<PathBuf> {
        let path = self.session_path(session_id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| JobError::io("create session workspace", &path, e))?;
        Ok(path)
    }

    /// Recursively remove a workspace.
    pub async fn dispose(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| JobError::io("remove workspace", path, e))?;
        tracing::debug!(workspace = %path.display(), "Disposed workspace");
        Ok(())
    }
}

/// A directory that belongs to a single job.
///
/// Call [`TransientWorkspace::dispose`] when the job ends. If the guard is
/// dropped first (the request was abandoned mid-flight) the directory is
/// removed on the blocking pool and any failure is only logged.
#[derive(Debug)]
pub struct TransientWorkspace {
    path: PathBuf,
    disposed: bool,
}

impl TransientWorkspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory on disk and hand back its path.
    pub fn keep(mut self) -> PathBuf {
        self.disposed = true;
        std::mem::take(&mut self.path)
    }

    /// Remove the directory, surfacing any failure.
    pub async fn dispose(mut self, manager: &WorkspaceManager) -> Result<()> {
        self.disposed = true;
        manager.dispose(&self.path).await
    }
}

impl Drop for TransientWorkspace {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_abandoned(&path));
            }
            Err(_) => remove_abandoned(&path),
        }
    }
}

fn remove_abandoned(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!(workspace = %path.display(), "Removed abandoned workspace");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                workspace = %path.display(),
                "Failed to remove abandoned workspace: {}",
                e
            );
        }
    }
}
