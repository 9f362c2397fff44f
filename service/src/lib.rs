//! # Booking Service
//!
//! Wiring for the booking pipeline binaries:
//!
//! - `booking-server`: HTTP ingress plus the background processing loop
//! - `booking-console`: prints every message of a topic, for diagnostics
//!
//! Both read their settings through [`Config::from_env`] after loading `.env`.

pub mod config;

pub use config::{Config, ConfigError};

use std::future::Future;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve once `signal` fires.
///
/// If the signal handler cannot be installed the error is logged and this
/// never resolves, so the host keeps serving instead of shutting down at once.
pub async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
