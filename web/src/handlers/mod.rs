//! HTTP request handlers.

pub mod booking;
pub mod health;
pub mod metrics;

pub use booking::{submit_booking, ACCEPTED_MESSAGE};
pub use health::{health_check, readiness};
pub use metrics::render_metrics;
