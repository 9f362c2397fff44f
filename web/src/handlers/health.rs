//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use booking_pipeline_runtime::LoopState;
use serde::Serialize;

/// Liveness: 200 while the process is serving HTTP.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// `"ready"` or `"unavailable"`
    pub status: &'static str,
    /// Processing loop state, when a loop is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<String>,
}

/// Readiness: 503 once the processing loop is stopping or stopped.
///
/// ```text
/// GET /health/ready
/// {"status":"ready","processing":"waiting-for-request"}
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let loop_state = state.loop_state();
    let ready = !matches!(loop_state, Some(LoopState::Stopping | LoopState::Stopped));

    let body = Readiness {
        status: if ready { "ready" } else { "unavailable" },
        processing: loop_state.map(|s| s.to_string()),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}
