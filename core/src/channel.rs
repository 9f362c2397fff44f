//! Message channel abstraction.
//!
//! A message channel is a durable, partitioned pub/sub topic with consumer
//! group offset tracking. The pipeline talks to it through two seams:
//!
//! - [`MessageSource`]: one subscription to one topic, in one consumer group
//! - [`MessageSink`]: publication of a single message with acknowledgment
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message read but not committed is redelivered to the
//!   next subscription in the same consumer group
//! - **Ordered within partition**: no ordering across partitions
//! - **Consumer groups are independent**: a diagnostic consumer in its own
//!   group never moves another group's committed position
//!
//! # Implementations
//!
//! - `KafkaSource` / `KafkaSink` in `booking-pipeline-redpanda` (production)
//! - `InMemoryBroker` in `booking-pipeline-testing` (tests)
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` instead of using `async fn` so that
//! `Arc<dyn MessageSink>` and `Box<dyn MessageSource>` remain usable.

use crate::message::{ConsumedMessage, Message, TopicPartitionOffset};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while talking to the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Failed to create a client or reach any broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumed position
    #[error("Commit failed at {position}: {reason}")]
    CommitFailed {
        /// The position that could not be committed
        position: TopicPartitionOffset,
        /// The reason for failure
        reason: String,
    },

    /// Failed to serialize an outgoing payload
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The subscription was already closed
    #[error("Subscription is closed")]
    Closed,
}

/// Where a consumer group starts when it has no committed position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AutoOffsetReset {
    /// Start from the beginning of each partition
    Earliest,
    /// Start after the last message currently in each partition
    #[default]
    Latest,
}

impl AutoOffsetReset {
    /// Kafka configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for AutoOffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutoOffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(Self::Earliest),
            "latest" | "largest" | "end" => Ok(Self::Latest),
            other => Err(format!("unknown offset reset policy '{other}'")),
        }
    }
}

/// Settings of a single subscription.
///
/// Defaults follow the Kafka client defaults: auto-commit on, no
/// end-of-partition notifications, start from the latest offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Topic to subscribe to
    pub topic: String,
    /// Consumer group sharing committed positions
    pub group_id: String,
    /// Start position for a group without committed offsets
    pub auto_offset_reset: AutoOffsetReset,
    /// Let the client commit in the background instead of after each read
    pub enable_auto_commit: bool,
    /// Report reaching the end of a partition
    pub enable_partition_eof: bool,
}

impl SubscriptionConfig {
    /// Create a subscription config with client defaults.
    #[must_use]
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            auto_offset_reset: AutoOffsetReset::default(),
            enable_auto_commit: true,
            enable_partition_eof: false,
        }
    }

    /// Set the offset reset policy.
    #[must_use]
    pub const fn auto_offset_reset(mut self, policy: AutoOffsetReset) -> Self {
        self.auto_offset_reset = policy;
        self
    }

    /// Enable or disable background offset commits.
    #[must_use]
    pub const fn enable_auto_commit(mut self, enabled: bool) -> Self {
        self.enable_auto_commit = enabled;
        self
    }

    /// Enable or disable end-of-partition notifications.
    #[must_use]
    pub const fn enable_partition_eof(mut self, enabled: bool) -> Self {
        self.enable_partition_eof = enabled;
        self
    }
}

/// Result of waiting on a [`MessageSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A message was consumed
    Message(ConsumedMessage),
    /// A partition has no further messages at this position
    PartitionEof(TopicPartitionOffset),
    /// The cancellation token fired while waiting
    Cancelled,
    /// The transport reported an error
    Error(ChannelError),
}

/// One subscription to one topic.
///
/// A source is owned by exactly one reader; `&mut self` keeps the blocking
/// wait, commits and close strictly sequential.
pub trait MessageSource: Send {
    /// The settings this subscription was created with.
    fn config(&self) -> &SubscriptionConfig;

    /// Wait for the next message, end-of-partition notification, transport
    /// error or cancellation, whichever comes first.
    ///
    /// The wait must observe `cancel` directly: when the token fires, the
    /// returned future resolves to [`PollOutcome::Cancelled`] without waiting
    /// for broker activity.
    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = PollOutcome> + Send + 'a>>;

    /// Commit a consumed position for this consumer group.
    ///
    /// The future resolves once the broker has answered the commit. A
    /// transport whose client commits synchronously must move that call off
    /// the async worker.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::CommitFailed`] if the broker rejects the commit,
    /// or [`ChannelError::Closed`] after [`close`](Self::close).
    fn commit<'a>(
        &'a mut self,
        position: &'a TopicPartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>>;

    /// Unsubscribe and release broker-side resources.
    ///
    /// Called from `Drop` as well, so it must not wait on the broker from an
    /// async worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TransportError`] if unsubscribing fails.
    fn close(&mut self) -> Result<(), ChannelError>;
}

/// Publication to the broker.
pub trait MessageSink: Send + Sync {
    /// Publish one message and resolve once the broker acknowledged or
    /// rejected it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] if delivery fails or times out.
    fn send<'a>(
        &'a self,
        topic: &'a str,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<TopicPartitionOffset, ChannelError>> + Send + 'a>>;
}
