//! Prometheus exposition.

use crate::error::AppError;
use crate::state::AppState;
use crate::WebResult;
use axum::extract::State;

/// Render the installed recorder in the Prometheus text format.
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// Returns a 503 [`AppError`] when no recorder is installed.
#[allow(clippy::unused_async)]
pub async fn render_metrics(State(state): State<AppState>) -> WebResult<String> {
    state
        .metrics()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| AppError::unavailable("metrics recorder not installed"))
}
