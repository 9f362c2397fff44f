//! Axum ingress for the booking pipeline.
//!
//! The HTTP side of the service is deliberately thin: it validates a booking
//! submission, hands it to a [`Writer`](booking_pipeline_runtime::Writer) bound
//! to the request topic and answers immediately. Processing happens
//! asynchronously in the [`ProcessingLoop`](booking_pipeline_runtime::ProcessingLoop).
//!
//! # Routes
//!
//! | route                | handler                          |
//! |----------------------|----------------------------------|
//! | `POST /api/booking`  | [`handlers::submit_booking`]     |
//! | `GET /health`        | [`handlers::health_check`]       |
//! | `GET /health/ready`  | [`handlers::readiness`]          |
//! | `GET /metrics`       | [`handlers::render_metrics`]     |
//!
//! # Example
//!
//! ```ignore
//! use booking_pipeline_web::{router, AppState};
//!
//! let app = router(AppState::new(request_writer).with_loop_state(processing.subscribe_state()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use error::AppError;
pub use middleware::{request_id_layer, RequestId, REQUEST_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the ingress router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/booking", post(handlers::submit_booking))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::render_metrics))
        .layer(request_id_layer())
        .with_state(state)
}
