//! # Booking Pipeline Core
//!
//! Core types and traits for the booking request/confirmation pipeline.
//!
//! This crate holds everything the pipeline components agree on, with no
//! transport or runtime attached:
//!
//! - [`booking`]: the domain model (`BookingRequest`, `BookingConfirmation`)
//! - [`message`]: the message envelope and its position on a topic
//! - [`channel`]: the `MessageSource` / `MessageSink` seams a broker implements
//!
//! ## Data Flow
//!
//! ```text
//! Ingress ─► Writer(booking-request) ─► broker ─► Reader(booking-request)
//!                                                        │
//!                                                        ▼
//!      any Reader ◄─ broker ◄─ Writer(booking-confirmation) ◄─ ProcessingLoop
//! ```
//!
//! Implementations of the channel traits live in `booking-pipeline-redpanda`
//! (Kafka-compatible) and `booking-pipeline-testing` (in-memory).

pub mod booking;
pub mod channel;
pub mod message;

// Re-export commonly used types
pub use booking::{BookingConfirmation, BookingRequest};
pub use channel::{
    AutoOffsetReset, ChannelError, MessageSink, MessageSource, PollOutcome, SubscriptionConfig,
};
pub use message::{ConsumedMessage, Message, TopicPartitionOffset};
pub use tokio_util::sync::CancellationToken;

/// Default topic carrying booking requests.
pub const TOPIC_BOOKING_REQUEST: &str = "booking-request";

/// Default topic carrying booking confirmations.
pub const TOPIC_BOOKING_CONFIRMATION: &str = "booking-confirmation";
