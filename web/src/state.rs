//! Shared state for the ingress handlers.

use booking_pipeline_runtime::{LoopState, Writer};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;

/// Application state shared across all HTTP handlers.
///
/// Cloning is cheap: the writer shares its sink and the receivers share their
/// channels.
#[derive(Clone)]
pub struct AppState {
    requests: Writer,
    loop_state: Option<watch::Receiver<LoopState>>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State publishing submissions through `requests`.
    #[must_use]
    pub const fn new(requests: Writer) -> Self {
        Self {
            requests,
            loop_state: None,
            metrics: None,
        }
    }

    /// Report the processing loop's state on `/health/ready`.
    #[must_use]
    pub fn with_loop_state(mut self, loop_state: watch::Receiver<LoopState>) -> Self {
        self.loop_state = Some(loop_state);
        self
    }

    /// Serve this recorder's exposition on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Writer bound to the request topic.
    #[must_use]
    pub const fn requests(&self) -> &Writer {
        &self.requests
    }

    /// Current processing loop state, if one is attached.
    #[must_use]
    pub fn loop_state(&self) -> Option<LoopState> {
        self.loop_state.as_ref().map(|state| *state.borrow())
    }

    /// Prometheus handle, if a recorder is installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}
