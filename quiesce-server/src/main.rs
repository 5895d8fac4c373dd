//! quiesce-server: standalone operator API around a suspend coordinator.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::Path, routing::get};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use quiesce::transport::admission;
use quiesce::{ControlService, QUIESCE_VERSION, ServerConfig, SuspendCoordinator};

/// Longest simulated request `/work/{millis}` will run.
const MAX_WORK_MILLIS: u64 = 60_000;

/// Log level from `QUIESCE_LOG` unless `RUST_LOG` takes over completely.
fn log_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let level = match std::env::var("QUIESCE_LOG").as_deref() {
        Ok("trace") => "trace",
        Ok("debug") => "debug",
        Ok("warn") | Ok("warning") => "warn",
        Ok("error") => "error",
        _ => "info",
    };

    EnvFilter::new(format!("quiesce={level},quiesce_server={level}"))
}

/// Simulated unit of work, so a suspend has something in flight to drain.
async fn work(Path(millis): Path<u64>) -> String {
    let millis = millis.min(MAX_WORK_MILLIS);
    tokio::time::sleep(Duration::from_millis(millis)).await;
    format!("worked {millis}ms\n")
}

fn app(coordinator: &SuspendCoordinator) -> Router {
    let gate = coordinator.register_gate("http");
    admission::gated(Router::new().route("/work/{millis}", get(work)), gate)
}

fn init_tracing() {
    let filter = log_filter();
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        version = QUIESCE_VERSION,
        host = %config.host,
        port = config.port,
        drain_timeout = ?config.drain_timeout,
        "Starting quiesce-server"
    );

    let coordinator = SuspendCoordinator::new();
    let app = app(&coordinator);
    let service = Arc::new(ControlService::new(coordinator));

    quiesce::transport::serve_with(config, service, app).await
}
