//! HTTP server lifecycle.
//!
//! Binds the listener, serves the API router, and on shutdown stops
//! accepting connections and cancels jobs that are still compiling.

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    /// Address to bind the server to.
    pub addr: SocketAddr,
}

/// The single HTTP server hosting the compile API.
///
/// `start()` binds and spawns the server task; `shutdown()` stops it.
pub struct Server {
    config: ServerConfig,
    router: Option<Router>,
    jobs: CancellationToken,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server for `router`. `jobs` is cancelled on shutdown so that
    /// running engines are killed instead of holding the server open.
    pub fn new(config: ServerConfig, router: Router, jobs: CancellationToken) -> Self {
        Self {
            config,
            router: Some(router),
            jobs,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server. Returns the bound address,
    /// which differs from the configured one when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let router = self.router.take().ok_or(ServerError::AlreadyStarted)?;

        let addr = self.config.addr;
        let bind_err = |source| ServerError::Bind { addr, source };
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!("xelatex-render listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Server shutting down");
                })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Stop accepting connections, cancel running jobs, and wait for the
    /// server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.jobs.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
