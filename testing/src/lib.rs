//! # Booking Pipeline Testing
//!
//! Testing utilities for the booking pipeline.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: partitioned topics, consumer groups, EOF and fault
//!   injection without a running Kafka
//! - [`fixtures`]: ready-made booking requests
//! - [`init_tracing`]: a test-friendly log subscriber
//!
//! ## Example
//!
//! ```ignore
//! use booking_pipeline_testing::{InMemoryBroker, fixtures};
//!
//! #[tokio::test]
//! async fn confirms_a_booking() {
//!     let broker = InMemoryBroker::new();
//!     broker.publish("booking-request", fixtures::DUNE_JSON);
//!     // ... run a ProcessingLoop against broker.subscribe(..) and broker.sink()
//! }
//! ```

pub mod broker;

pub use broker::{InMemoryBroker, InMemorySource};

/// Booking fixtures shared by tests.
pub mod fixtures {
    use booking_pipeline_core::BookingRequest;
    use chrono::DateTime;

    /// The canonical end-to-end request payload.
    pub const DUNE_JSON: &str =
        r#"{"movieName":"Dune","cinema":3,"screeningTime":"2024-01-01T20:00:00Z"}"#;

    /// `Dune` in cinema 3 at 2024-01-01T20:00:00Z.
    #[must_use]
    pub fn dune() -> BookingRequest {
        booking("Dune", 3, "2024-01-01T20:00:00Z")
    }

    /// A request for `movie` in `cinema` at the RFC 3339 time `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at` is not valid RFC 3339.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn booking(movie: &str, cinema: i32, at: &str) -> BookingRequest {
        BookingRequest::new(
            movie,
            cinema,
            DateTime::parse_from_rfc3339(at).expect("fixture timestamp must be RFC 3339"),
        )
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booking=debug,warn".into()),
        )
        .with_test_writer()
        .try_init();
}
