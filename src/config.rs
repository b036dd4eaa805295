//! Runtime configuration.
//!
//! Every setting can be given as a flag or through the environment. The
//! binary loads a `.env` file before parsing, so deployments can keep their
//! settings there.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::compiler::Compiler;
use crate::error::ConfigError;
use crate::workspace::WorkspaceManager;

/// Default request body limit (32 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Service configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "xelatex-render")]
#[command(version, about = "Compile LaTeX sources to PDF over HTTP")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "XELATEX_RENDER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "XELATEX_RENDER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding job and session workspaces (defaults to the system temp dir)
    #[arg(long, env = "XELATEX_RENDER_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// xelatex executable
    #[arg(long, env = "XELATEX_BIN", default_value = "xelatex")]
    pub xelatex_bin: PathBuf,

    /// latexmk executable
    #[arg(long, env = "LATEXMK_BIN", default_value = "latexmk")]
    pub latexmk_bin: PathBuf,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "XELATEX_RENDER_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Log output format
    #[arg(long, env = "XELATEX_RENDER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            workspace_root: None,
            xelatex_bin: PathBuf::from("xelatex"),
            latexmk_bin: PathBuf::from("latexmk"),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Socket address to bind.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Root directory for workspaces.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_body_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }

        let root = self.workspace_root();
        if !root.is_dir() {
            return Err(ConfigError::Invalid {
                key: "workspace_root",
                reason: format!("{} is not a directory", root.display()),
            });
        }

        Ok(())
    }

    /// Engine runner for the configured executables.
    pub fn compiler(&self) -> Compiler {
        Compiler::new()
            .with_xelatex_bin(&self.xelatex_bin)
            .with_latexmk_bin(&self.latexmk_bin)
    }

    /// Workspace manager rooted at the configured directory.
    pub fn workspaces(&self) -> WorkspaceManager {
        WorkspaceManager::new(self.workspace_root())
    }
}
