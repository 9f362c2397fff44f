//! Kafka/Redpanda transport for the booking pipeline.
//!
//! Implements the broker seams of `booking-pipeline-core` on top of rdkafka:
//!
//! - [`KafkaSource`]: one consumer, one topic, one consumer group
//! - [`KafkaSink`]: one shared producer waiting for delivery reports
//! - [`PipelineContext`]: librdkafka logs, client errors and commit results
//!   routed into `tracing`
//!
//! Any Kafka-compatible broker works: Redpanda, Apache Kafka, MSK.
//!
//! # Delivery Semantics
//!
//! With auto-commit off, the reader commits each message right after it is
//! read, before processing. A crash after the commit loses that message; a
//! crash before it redelivers the message to the next member of the group.
//! With auto-commit on, librdkafka commits periodically in the background.
//!
//! # Example
//!
//! ```no_run
//! use booking_pipeline_core::{AutoOffsetReset, SubscriptionConfig, TOPIC_BOOKING_REQUEST};
//! use booking_pipeline_redpanda::{KafkaSink, KafkaSource};
//! use booking_pipeline_runtime::{Reader, Writer};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = KafkaSource::builder()
//!     .brokers("localhost:9092")
//!     .subscription(
//!         SubscriptionConfig::new(TOPIC_BOOKING_REQUEST, "booking-processing")
//!             .auto_offset_reset(AutoOffsetReset::Earliest)
//!             .enable_auto_commit(false),
//!     )
//!     .build()?;
//! let reader = Reader::new(source);
//!
//! let sink = Arc::new(KafkaSink::new("localhost:9092")?);
//! let writer = Writer::new(sink, "booking-confirmation");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod context;
pub mod sink;
pub mod source;

pub use context::PipelineContext;
pub use sink::{KafkaSink, KafkaSinkBuilder};
pub use source::{KafkaSource, KafkaSourceBuilder};
