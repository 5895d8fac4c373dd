//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::service::ControlService;

use super::routes::routes;

/// Start the operator HTTP server.
///
/// On SIGINT, SIGTERM, or `POST /shutdown` the coordinator is suspended and the
/// server keeps answering (so `/suspend-state` can be watched) until every gate
/// drains or `drain_timeout` passes.
pub async fn serve(config: ServerConfig, service: Arc<ControlService>) -> anyhow::Result<()> {
    serve_with(config, service, Router::new()).await
}

/// Like [`serve`], with application routes merged next to the operator API.
pub async fn serve_with(
    config: ServerConfig,
    service: Arc<ControlService>,
    app: Router,
) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    let app = routes(Arc::clone(&service)).merge(app);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Starting quiesce server on {}", actual_addr);

    let drain_timeout = config.drain_timeout;
    let draining = Arc::clone(&service);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(config.await_explicit_shutdown, shutdown_rx).await;
            if let Err(e) = draining.drain(drain_timeout).await {
                warn!(error = %e, "Shutting down with work still in flight");
            }
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or /shutdown endpoint).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed, which only happens when the
/// tokio runtime is misconfigured. That should fail fast at startup.
async fn shutdown_signal(await_explicit_shutdown: bool, mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        if await_explicit_shutdown {
            tracing::info!("await_explicit_shutdown enabled, ignoring SIGTERM");
            std::future::pending::<()>().await
        } else {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect(
                    "failed to install SIGTERM handler - is tokio runtime configured correctly?",
                )
                .recv()
                .await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, suspending...");
        }
        _ = terminate => {
            info!("Received SIGTERM, suspending...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested via /shutdown endpoint, suspending...");
        }
    }
}
