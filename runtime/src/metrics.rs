//! Prometheus metrics for the booking pipeline.
//!
//! Every outcome the Reader, Writer and processing loop report is counted,
//! including the ones the loop recovers from. A dropped confirmation never
//! reaches the original submitter, so `booking_confirmations_failed_total` is
//! the signal to alert on.
//!
//! Counters are recorded through the global `metrics` recorder. Without a
//! recorder installed they are no-ops, which is what unit tests rely on.
//!
//! # Example
//!
//! ```rust,no_run
//! use booking_pipeline_runtime::metrics::PrometheusMetrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::install()?;
//! if let Some(text) = metrics.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

const READER_CONSUMED: &str = "booking_reader_messages_consumed_total";
const READER_EOF: &str = "booking_reader_partition_eof_total";
const READER_TRANSPORT_ERRORS: &str = "booking_reader_transport_errors_total";
const READER_COMMIT_FAILURES: &str = "booking_reader_commit_failures_total";
const WRITER_DELIVERED: &str = "booking_writer_messages_delivered_total";
const WRITER_FAILED: &str = "booking_writer_delivery_failures_total";
const WRITER_DURATION: &str = "booking_writer_publish_duration_seconds";
const REQUESTS_PROCESSED: &str = "booking_requests_processed_total";
const REQUESTS_MALFORMED: &str = "booking_requests_malformed_total";
const REQUESTS_DEAD_LETTERED: &str = "booking_requests_dead_lettered_total";
const CONFIRMATIONS_PUBLISHED: &str = "booking_confirmations_published_total";
const CONFIRMATIONS_FAILED: &str = "booking_confirmations_failed_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
///
/// The text exposition is served by the ingress router at `GET /metrics`.
pub struct PrometheusMetrics {
    handle: Option<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), no handle is
    /// kept and [`render`](Self::render) returns `None`.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                tracing::info!("Prometheus recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// The recorder handle, if this instance installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }
}

fn register_metrics() {
    describe_counter!(READER_CONSUMED, "Messages consumed by readers");
    describe_counter!(READER_EOF, "End-of-partition notifications seen by readers");
    describe_counter!(READER_TRANSPORT_ERRORS, "Transport errors returned to readers");
    describe_counter!(READER_COMMIT_FAILURES, "Offset commits that failed after a read");
    describe_counter!(WRITER_DELIVERED, "Messages acknowledged by the broker");
    describe_counter!(WRITER_FAILED, "Messages the broker rejected or that timed out");
    describe_histogram!(WRITER_DURATION, "Time from publish to broker acknowledgment");
    describe_counter!(REQUESTS_PROCESSED, "Booking requests decoded and confirmed");
    describe_counter!(REQUESTS_MALFORMED, "Booking request payloads that failed to decode");
    describe_counter!(REQUESTS_DEAD_LETTERED, "Malformed payloads written to the dead-letter topic");
    describe_counter!(CONFIRMATIONS_PUBLISHED, "Confirmations delivered to the broker");
    describe_counter!(CONFIRMATIONS_FAILED, "Confirmations dropped after a failed publish");
}

/// Reader metrics recorder.
pub struct ReaderMetrics;

impl ReaderMetrics {
    /// Record a consumed message.
    pub fn record_consume(topic: &str) {
        counter!(READER_CONSUMED, "topic" => topic.to_owned()).increment(1);
    }

    /// Record an end-of-partition notification.
    pub fn record_eof(topic: &str) {
        counter!(READER_EOF, "topic" => topic.to_owned()).increment(1);
    }

    /// Record a transport error.
    pub fn record_transport_error(topic: &str) {
        counter!(READER_TRANSPORT_ERRORS, "topic" => topic.to_owned()).increment(1);
    }

    /// Record a failed commit.
    pub fn record_commit_failure(topic: &str) {
        counter!(READER_COMMIT_FAILURES, "topic" => topic.to_owned()).increment(1);
    }
}

/// Writer metrics recorder.
pub struct WriterMetrics;

impl WriterMetrics {
    /// Record an acknowledged message.
    pub fn record_delivered(topic: &str, duration: Duration) {
        counter!(WRITER_DELIVERED, "topic" => topic.to_owned()).increment(1);
        histogram!(WRITER_DURATION, "topic" => topic.to_owned()).record(duration.as_secs_f64());
    }

    /// Record a failed delivery.
    pub fn record_failed(topic: &str) {
        counter!(WRITER_FAILED, "topic" => topic.to_owned()).increment(1);
    }
}

/// Processing loop metrics recorder.
pub struct LoopMetrics;

impl LoopMetrics {
    /// Record a request that was decoded and confirmed.
    pub fn record_processed() {
        counter!(REQUESTS_PROCESSED).increment(1);
    }

    /// Record a payload that failed to decode.
    pub fn record_malformed() {
        counter!(REQUESTS_MALFORMED).increment(1);
    }

    /// Record a payload forwarded to the dead-letter topic.
    pub fn record_dead_lettered() {
        counter!(REQUESTS_DEAD_LETTERED).increment(1);
    }

    /// Record a delivered confirmation.
    pub fn record_published() {
        counter!(CONFIRMATIONS_PUBLISHED).increment(1);
    }

    /// Record a dropped confirmation.
    pub fn record_publish_failure() {
        counter!(CONFIRMATIONS_FAILED).increment(1);
    }
}
