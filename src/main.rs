//! xelatex-render binary.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use xelatex_render::config::LogFormat;
use xelatex_render::{AppState, Config, Orchestrator, RenderApi, Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    init_tracing(config.log_format);
    config.validate()?;

    tracing::info!(
        workspace_root = %config.workspace_root().display(),
        xelatex = %config.xelatex_bin.display(),
        latexmk = %config.latexmk_bin.display(),
        "Starting xelatex-render"
    );

    let orchestrator = Orchestrator::new(config.compiler(), config.workspaces());
    let state = AppState::new(orchestrator);
    let jobs = state.shutdown.clone();
    let router = RenderApi::router(state, config.max_body_bytes);

    let mut server = Server::new(ServerConfig { addr: config.addr() }, router, jobs);
    server.start().await?;

    shutdown_signal().await;
    server.shutdown().await;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xelatex_render=info,tower_http=info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
