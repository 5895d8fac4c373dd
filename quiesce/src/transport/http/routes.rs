//! HTTP route handlers for the operator API.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::QUIESCE_VERSION;
use crate::service::ControlService;
use crate::state::SuspendState;

/// Health as reported to load balancers and probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Admitting work
    Ready,
    /// Draining in-flight work, refusing new work
    Suspending,
    /// Drained
    Suspended,
}

impl From<SuspendState> for HealthStatus {
    fn from(state: SuspendState) -> Self {
        match state {
            SuspendState::Running => HealthStatus::Ready,
            SuspendState::Suspending => HealthStatus::Suspending,
            SuspendState::Suspended => HealthStatus::Suspended,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    /// Permits held across all gates.
    pub outstanding: i64,
}

async fn health_check(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    let snapshot = service.snapshot();
    let status = HealthStatus::from(snapshot.state);
    let outstanding = snapshot.gates.iter().map(|g| g.outstanding).sum();

    // Non-ready is 503 so load balancers stop routing here during a drain.
    let code = match status {
        HealthStatus::Ready => StatusCode::OK,
        HealthStatus::Suspending | HealthStatus::Suspended => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        code,
        Json(HealthCheckResponse {
            status,
            version: QUIESCE_VERSION,
            outstanding,
        }),
    )
}

async fn suspend_state(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    Json(service.snapshot())
}

async fn suspend(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    tracing::info!("Suspend requested via HTTP");
    let snapshot = service.suspend();
    (StatusCode::ACCEPTED, Json(snapshot))
}

async fn resume(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    tracing::info!("Resume requested via HTTP");
    (StatusCode::OK, Json(service.resume()))
}

async fn shutdown(State(service): State<Arc<ControlService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<ControlService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/suspend-state", get(suspend_state))
        .route("/suspend", post(suspend))
        .route("/resume", post(resume))
        .route("/shutdown", post(shutdown))
        .with_state(service)
}
