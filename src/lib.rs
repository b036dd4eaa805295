//! xelatex-render: compile LaTeX sources to PDF over HTTP.
//!
//! Each request writes the uploaded source into its own working directory,
//! runs `xelatex` or `latexmk` there, and answers with the PDF or with the
//! engine's log. Sessions keep their working directory between requests so
//! repeated compilations can reuse auxiliary files.

pub mod api;
pub mod compiler;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod workspace;

pub use api::{ApiError, AppState, RenderApi};
pub use compiler::{Compiler, Engine};
pub use config::Config;
pub use error::{ConfigError, InvokeError, JobError, ServerError};
pub use orchestrator::{Job, Orchestrator};
pub use server::{Server, ServerConfig};
pub use session::SessionRegistry;
pub use workspace::WorkspaceManager;
