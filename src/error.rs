//! Error types for compilation jobs and the HTTP surface.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::compiler::Engine;

/// Errors raised while running an engine process.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The executable could not be launched at all.
    #[error("Failed to start {engine}: {source}")]
    Spawn {
        engine: Engine,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully. `code` is `None` when it
    /// was terminated by a signal.
    #[error("{engine} exited with {}", exit_label(.code))]
    Exited { engine: Engine, code: Option<i32> },

    /// Waiting on the process failed after it started.
    #[error("Failed waiting for {engine}: {source}")]
    Wait {
        engine: Engine,
        #[source]
        source: std::io::Error,
    },

    /// The job was cancelled and the process killed.
    #[error("{engine} was cancelled")]
    Cancelled { engine: Engine },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}.", code),
        None => "no exit code (terminated by signal).".to_string(),
    }
}

/// Errors that can fail a single compilation job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The engine failed and left a log behind. `log` is the engine's own
    /// output, which is what the caller needs to fix the document.
    #[error("{log}")]
    Diagnostic {
        log: String,
        #[source]
        source: InvokeError,
    },

    /// The engine failed and no log could be recovered.
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// A filesystem step of the job failed.
    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job was cancelled before the engine ran.
    #[error("Compilation was cancelled")]
    Cancelled,
}

impl JobError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from a cancellation rather than the document.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Invoke(InvokeError::Cancelled { .. }) => true,
            Self::Diagnostic { source, .. } => matches!(source, InvokeError::Cancelled { .. }),
            _ => false,
        }
    }
}

/// Errors rejected at startup while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors from starting the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server already started")]
    AlreadyStarted,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for job operations.
pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_message_includes_code() {
        let err = InvokeError::Exited {
            engine: Engine::Xelatex,
            code: Some(1),
        };
        assert_eq!(err.to_string(), "xelatex exited with code 1.");

        let err = InvokeError::Exited {
            engine: Engine::Latexmk,
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn diagnostic_message_is_log_text() {
        let err = JobError::Diagnostic {
            log: "! Emergency stop.".to_string(),
            source: InvokeError::Exited {
                engine: Engine::Xelatex,
                code: Some(1),
            },
        };
        assert_eq!(err.to_string(), "! Emergency stop.");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cancellation_is_detected_through_wrappers() {
        assert!(JobError::Cancelled.is_cancelled());
        assert!(
            JobError::Invoke(InvokeError::Cancelled {
                engine: Engine::Latexmk
            })
            .is_cancelled()
        );
    }
}
