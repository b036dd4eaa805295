//! Compilation job orchestration.
//!
//! The `Orchestrator` drives one job from source bytes to PDF bytes:
//!
//! ```text
//!   compile(source, job)
//!         │
//!         ▼
//!   ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//!   │ Workspace    │────▶│ Write        │────▶│ Run engine       │
//!   │ (alloc/keep) │     │ <job>.tex    │     │ (× engine passes)│
//!   └──────────────┘     └──────────────┘     └──────────────────┘
//!                                                │           │
//!                                             success      failure
//!                                                ▼           ▼
//!                                        read <job>.pdf   read <job>.log
//!                                                │           │
//!                                                └─────┬─────┘
//!                                                      ▼
//!                                        dispose workspace (unless kept)
//! ```

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::compiler::{Compiler, Engine};
use crate::error::{InvokeError, JobError, Result};
use crate::workspace::WorkspaceManager;

/// Leading bytes of every PDF file.
const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// A single compilation request.
#[derive(Debug, Clone)]
pub struct Job {
    /// Base name of the source, log and artifact files.
    pub name: String,
    pub engine: Engine,
    /// Existing directory to compile in. A fresh one is allocated when `None`.
    pub workspace: Option<PathBuf>,
    /// Leave the workspace on disk after the job.
    pub keep_workspace: bool,
}

impl Job {
    /// A one-off job in its own throwaway directory.
    pub fn transient(name: impl Into<String>, engine: Engine) -> Self {
        Self {
            name: name.into(),
            engine,
            workspace: None,
            keep_workspace: false,
        }
    }

    /// A job that compiles inside a persistent directory and leaves it there.
    pub fn persistent(name: impl Into<String>, engine: Engine, workspace: PathBuf) -> Self {
        Self {
            name: name.into(),
            engine,
            workspace: Some(workspace),
            keep_workspace: true,
        }
    }

    pub fn source_file(&self) -> String {
        format!("{}.tex", self.name)
    }

    pub fn artifact_file(&self) -> String {
        format!("{}.pdf", self.name)
    }

    pub fn log_file(&self) -> String {
        format!("{}.log", self.name)
    }
}

/// Coordinates workspaces and engine runs.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    compiler: Compiler,
    workspaces: WorkspaceManager,
}

impl Orchestrator {
    pub fn new(compiler: Compiler, workspaces: WorkspaceManager) -> Self {
        Self {
            compiler,
            workspaces,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Compile `source` and return the PDF bytes.
    ///
    /// Transient workspaces are removed on every path, including when this
    /// future is dropped before completion.
    pub async fn compile<R>(
        &self,
        source: R,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let span = tracing::info_span!("job", job = %job.name, engine = %job.engine);
        self.compile_inner(source, job, cancel).instrument(span).await
    }

    async fn compile_inner<R>(
        &self,
        mut source: R,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (workdir, transient) = match &job.workspace {
            Some(dir) => (dir.clone(), None),
            None => {
                let workspace = self.workspaces.allocate_transient().await?;
                (workspace.path().to_path_buf(), Some(workspace))
            }
        };

        let result = self.run_job(&mut source, &job, &workdir, cancel).await;

        if job.keep_workspace {
            if let Some(workspace) = transient {
                workspace.keep();
            }
            return result;
        }

        let disposal = match transient {
            Some(workspace) => workspace.dispose(&self.workspaces).await,
            None => self.workspaces.dispose(&workdir).await,
        };

        match (result, disposal) {
            (Ok(pdf), Ok(())) => Ok(pdf),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(disposal_err)) => {
                tracing::warn!(
                    "Workspace cleanup after failed job also failed: {}",
                    disposal_err
                );
                Err(e)
            }
        }
    }

    async fn run_job<R>(
        &self,
        source: &mut R,
        job: &Job,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let source_path = workdir.join(job.source_file());
        let written = write_source(source, &source_path, cancel).await?;
        tracing::info!(source = %source_path.display(), bytes = written, "Compiling");

        // Session workspaces keep outputs of earlier runs around.
        for stale in [job.log_file(), job.artifact_file()] {
            remove_stale(&workdir.join(stale)).await?;
        }

        if let Err(err) = self
            .compiler
            .run(job.engine, workdir, &job.source_file(), cancel)
            .await
        {
            return Err(recover_diagnostic(job, workdir, err).await);
        }

        let artifact_path = workdir.join(job.artifact_file());
        let pdf = tokio::fs::read(&artifact_path)
            .await
            .map_err(|e| JobError::io("read artifact", &artifact_path, e))?;

        if !pdf.starts_with(PDF_SIGNATURE) {
            tracing::warn!(
                artifact = %artifact_path.display(),
                "Engine succeeded but the artifact has no PDF signature"
            );
        }

        tracing::info!(bytes = pdf.len(), "Compilation finished");
        Ok(pdf)
    }
}

/// Stream the source into `path`, replacing whatever was there.
async fn write_source<R>(source: &mut R, path: &Path, cancel: &CancellationToken) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| JobError::io("create source", path, e))?;

    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        copied = tokio::io::copy(source, &mut file) => {
            copied.map_err(|e| JobError::io("write source", path, e))?
        }
    };

    file.flush()
        .await
        .map_err(|e| JobError::io("write source", path, e))?;
    Ok(written)
}

/// Remove a previous run's output so it cannot be mistaken for this run's.
async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(file = %path.display(), "Removed output of a previous run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JobError::io("remove stale output", path, e)),
    }
}

/// Turn an engine failure into a diagnostic carrying the engine's log.
///
/// Falls back to the bare engine error when the source is gone, the log is
/// unreadable, or the job was cancelled.
async fn recover_diagnostic(job: &Job, workdir: &Path, err: InvokeError) -> JobError {
    if matches!(err, InvokeError::Cancelled { .. }) {
        return JobError::Invoke(err);
    }

    tracing::warn!(error = %err, "Engine failed");

    if !tokio::fs::try_exists(workdir.join(job.source_file()))
        .await
        .unwrap_or(false)
    {
        return JobError::Invoke(err);
    }

    let log_path = workdir.join(job.log_file());
    match tokio::fs::read(&log_path).await {
        Ok(bytes) => JobError::Diagnostic {
            log: String::from_utf8_lossy(&bytes).into_owned(),
            source: err,
        },
        Err(e) => {
            tracing::debug!(log = %log_path.display(), "No engine log to recover: {}", e);
            JobError::Invoke(err)
        }
    }
}
