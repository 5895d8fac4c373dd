//! Admission middleware: every request holds a gate permit while its handler runs.
//!
//! The permit is returned once the handler has produced a response. Streaming
//! bodies keep flowing after that point and are not tracked.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use crate::gate::QuiescenceGate;

/// Seconds suggested to clients in `Retry-After` when a gate is draining.
const RETRY_AFTER_SECS: &str = "5";

async fn admit(State(gate): State<QuiescenceGate>, request: Request, next: Next) -> Response {
    let permit = match gate.acquire_permit() {
        Ok(permit) => permit,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let response = next.run(request).await;
    if let Err(e) = permit.release() {
        tracing::error!(gate = %gate.name(), error = %e, "Failed to release request permit");
    }
    response
}

/// Put every route of `router` behind `gate`.
pub fn gated<S>(router: Router<S>, gate: QuiescenceGate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(gate, admit))
}
