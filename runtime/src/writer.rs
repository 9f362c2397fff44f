//! One-message-at-a-time publication to a topic.
//!
//! Every call publishes exactly one message and resolves only after the broker
//! acknowledged or rejected it. There is no batching visible to the caller.
//!
//! Each message is keyed with a fresh UUID. The key spreads messages across
//! partitions; it is unrelated to the payload and has no business meaning.
//!
//! A failed delivery is logged and returned as [`WriteOutcome::Failed`]; the
//! Writer itself never errors out. What to do about a dropped message is the
//! caller's decision.

use crate::metrics::WriterMetrics;
use booking_pipeline_core::{ChannelError, Message, MessageSink, TopicPartitionOffset};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Result of one write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The broker stored the message at this position
    Delivered(TopicPartitionOffset),
    /// Serialization or delivery failed
    Failed(ChannelError),
}

impl WriteOutcome {
    /// Whether the broker acknowledged the message.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Publishes to one topic through a shared [`MessageSink`].
#[derive(Clone)]
pub struct Writer {
    sink: Arc<dyn MessageSink>,
    topic: String,
}

impl Writer {
    /// Create a writer bound to `topic`.
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
        }
    }

    /// Target topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize `value` to JSON and publish it.
    pub async fn write<T>(&self, value: &T) -> WriteOutcome
    where
        T: Serialize + ?Sized,
    {
        self.write_with_headers(value, HashMap::new()).await
    }

    /// Serialize `value` to JSON and publish it with transport `headers`.
    pub async fn write_with_headers<T>(
        &self,
        value: &T,
        headers: HashMap<String, Vec<u8>>,
    ) -> WriteOutcome
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_string(value) {
            Ok(payload) => {
                let mut message = Message::with_fresh_key(payload);
                message.headers = headers;
                self.publish(message).await
            }
            Err(e) => {
                tracing::error!(
                    topic = %self.topic,
                    error = %e,
                    "Failed to serialize message"
                );
                WriterMetrics::record_failed(&self.topic);
                WriteOutcome::Failed(ChannelError::Serialization(e.to_string()))
            }
        }
    }

    /// Publish a raw payload.
    pub async fn write_raw(&self, payload: impl Into<String>) -> WriteOutcome {
        self.publish(Message::with_fresh_key(payload)).await
    }

    async fn publish(&self, message: Message) -> WriteOutcome {
        let key = message.key.clone();
        let value = message.value.clone();
        let started = Instant::now();

        match self.sink.send(&self.topic, message).await {
            Ok(position) => {
                tracing::info!(
                    key = %key,
                    value = %value,
                    position = %position,
                    "Delivered message"
                );
                WriterMetrics::record_delivered(&self.topic, started.elapsed());
                WriteOutcome::Delivered(position)
            }
            Err(e) => {
                tracing::error!(
                    topic = %self.topic,
                    key = %key,
                    error = %e,
                    "Producer error"
                );
                WriterMetrics::record_failed(&self.topic);
                WriteOutcome::Failed(e)
            }
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer").field("topic", &self.topic).finish_non_exhaustive()
    }
}
