//! Engine invocation for LaTeX compilation.
//!
//! Runs `xelatex` or `latexmk` against a source file inside a job's
//! workspace:
//! - Non-interactive, halting on the first fatal error
//! - Working directory pinned to the workspace so `.log`/`.pdf` land there
//! - Console output discarded; the engine's `.log` file is the diagnostic
//! - The process is killed when the job is cancelled or dropped
//!
//! # Pass policy
//!
//! `xelatex` is a single-pass tool and is always run twice so that
//! cross-references and tables of contents resolve. The second pass only
//! runs if the first one succeeded. `latexmk` drives its own passes and is
//! run exactly once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::InvokeError;

/// Number of `xelatex` runs per job.
const XELATEX_PASSES: usize = 2;

/// Flags passed to every engine run.
const BATCH_FLAGS: [&str; 2] = ["-interaction=nonstopmode", "-halt-on-error"];

/// A supported typesetting tool-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// `xelatex`, run a fixed number of times.
    Xelatex,
    /// `latexmk -xelatex`, which repeats passes until the output is stable.
    Latexmk,
}

impl Engine {
    /// Default executable name.
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Xelatex => "xelatex",
            Engine::Latexmk => "latexmk",
        }
    }

    /// How many times the engine is invoked for one job.
    pub fn passes(&self) -> usize {
        match self {
            Engine::Xelatex => XELATEX_PASSES,
            Engine::Latexmk => 1,
        }
    }

    fn leading_args(&self) -> &'static [&'static str] {
        match self {
            Engine::Xelatex => &[],
            Engine::Latexmk => &["-xelatex"],
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xelatex" => Ok(Engine::Xelatex),
            "latexmk" => Ok(Engine::Latexmk),
            _ => Err(format!(
                "invalid engine '{}', expected 'xelatex' or 'latexmk'",
                s
            )),
        }
    }
}

/// Runs engine processes.
#[derive(Debug, Clone)]
pub struct Compiler {
    xelatex_bin: PathBuf,
    latexmk_bin: PathBuf,
}

impl Compiler {
    /// Create a compiler that resolves both engines from `PATH`.
    pub fn new() -> Self {
        Self {
            xelatex_bin: PathBuf::from(Engine::Xelatex.name()),
            latexmk_bin: PathBuf::from(Engine::Latexmk.name()),
        }
    }

    /// Override the `xelatex` executable.
    pub fn with_xelatex_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.xelatex_bin = bin.into();
        self
    }

    /// Override the `latexmk` executable.
    pub fn with_latexmk_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.latexmk_bin = bin.into();
        self
    }

    /// Executable used for `engine`.
    pub fn program(&self, engine: Engine) -> &Path {
        match engine {
            Engine::Xelatex => &self.xelatex_bin,
            Engine::Latexmk => &self.latexmk_bin,
        }
    }

    /// Compile `source_file` (relative to `workdir`) with `engine`.
    ///
    /// Stops at the first failing pass.
    pub async fn run(
        &self,
        engine: Engine,
        workdir: &Path,
        source_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), InvokeError> {
        for pass in 1..=engine.passes() {
            tracing::debug!(%engine, pass, source = source_file, "Starting engine pass");
            self.run_once(engine, workdir, source_file, cancel).await?;
        }
        Ok(())
    }

    async fn run_once(
        &self,
        engine: Engine,
        workdir: &Path,
        source_file: &str,
        cancel: &CancellationToken,
    ) -> Result<(), InvokeError> {
        let mut command = Command::new(self.program(engine));
        command
            .args(engine.leading_args())
            .args(BATCH_FLAGS)
            .arg(source_file)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|source| InvokeError::Spawn { engine, source })?;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(%engine, "Failed to kill cancelled engine: {}", e);
                }
                return Err(InvokeError::Cancelled { engine });
            }
            status = child.wait() => {
                status.map_err(|source| InvokeError::Wait { engine, source })?
            }
        };

        if status.success() {
            Ok(())
        } else {
            tracing::debug!(%engine, exit_code = ?status.code(), "Engine pass failed");
            Err(InvokeError::Exited {
                engine,
                code: status.code(),
            })
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
