//! Kafka-backed [`MessageSource`].

use crate::context::PipelineContext;
use booking_pipeline_core::{
    ChannelError, ConsumedMessage, Message, MessageSource, PollOutcome, SubscriptionConfig,
    TopicPartitionOffset,
};
use chrono::{DateTime, Utc};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A single-topic Kafka subscription.
///
/// Offsets are committed synchronously through [`MessageSource::commit`] when
/// auto-commit is off; otherwise librdkafka commits in the background. The
/// synchronous commit and the final unsubscribe run on tokio's blocking pool
/// so they never hold up an async worker.
///
/// # Example
///
/// ```no_run
/// use booking_pipeline_core::{AutoOffsetReset, SubscriptionConfig};
/// use booking_pipeline_redpanda::KafkaSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = KafkaSource::builder()
///     .brokers("localhost:9092")
///     .subscription(
///         SubscriptionConfig::new("booking-request", "booking-processing")
///             .auto_offset_reset(AutoOffsetReset::Earliest)
///             .enable_auto_commit(false),
///     )
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaSource {
    consumer: Option<Arc<StreamConsumer<PipelineContext>>>,
    config: SubscriptionConfig,
    /// Next offset per partition, used to position end-of-partition events
    next_offsets: HashMap<i32, i64>,
}

impl KafkaSource {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> KafkaSourceBuilder {
        KafkaSourceBuilder::default()
    }
}

impl MessageSource for KafkaSource {
    fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = PollOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(consumer) = self.consumer.as_ref() else {
                return PollOutcome::Error(ChannelError::Closed);
            };

            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => return PollOutcome::Cancelled,
                received = consumer.recv() => received.map(|message| {
                    let position = TopicPartitionOffset::new(
                        message.topic(),
                        message.partition(),
                        message.offset(),
                    );
                    (position, to_owned_message(&message))
                }),
            };

            match received {
                Ok((position, message)) => {
                    self.next_offsets.insert(position.partition, position.offset + 1);
                    PollOutcome::Message(ConsumedMessage {
                        position,
                        message,
                    })
                }
                Err(KafkaError::PartitionEOF(partition)) => {
                    let reported = consumer.position().ok();
                    let offset = eof_offset(
                        self.next_offsets.get(&partition).copied(),
                        reported.as_ref(),
                        &self.config.topic,
                        partition,
                    );
                    PollOutcome::PartitionEof(TopicPartitionOffset::new(
                        &self.config.topic,
                        partition,
                        offset,
                    ))
                }
                Err(e) => PollOutcome::Error(ChannelError::TransportError(e.to_string())),
            }
        })
    }

    fn commit<'a>(
        &'a mut self,
        position: &'a TopicPartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let consumer = Arc::clone(self.consumer.as_ref().ok_or(ChannelError::Closed)?);

            let commit_failed = |reason: String| ChannelError::CommitFailed {
                position: position.clone(),
                reason,
            };

            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(
                    &position.topic,
                    position.partition,
                    Offset::Offset(position.offset + 1),
                )
                .map_err(|e| commit_failed(e.to_string()))?;

            tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
                .await
                .map_err(|e| commit_failed(e.to_string()))?
                .map_err(|e| commit_failed(e.to_string()))
        })
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        let topic = self.config.topic.clone();
        let group_id = self.config.group_id.clone();
        let release = move || {
            consumer.unsubscribe();
            drop(consumer);
            tracing::debug!(topic = %topic, group_id = %group_id, "Kafka consumer unsubscribed");
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(release);
            }
            Err(_) => release(),
        }
        Ok(())
    }
}

/// Offset to report for an end-of-partition event.
///
/// Prefers the next offset this source tracked itself; before the first
/// message on `partition` it falls back to the consumer's reported position,
/// which reflects the group's committed offset after a restart.
fn eof_offset(
    tracked: Option<i64>,
    reported: Option<&TopicPartitionList>,
    topic: &str,
    partition: i32,
) -> i64 {
    tracked
        .or_else(|| {
            let element = reported?.find_partition(topic, partition)?;
            match element.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            }
        })
        .unwrap_or(0)
}

/// Copy a borrowed Kafka message into an owned [`Message`].
fn to_owned_message(message: &BorrowedMessage<'_>) -> Message {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Message {
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default(),
        value: message
            .payload()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .unwrap_or_default(),
        timestamp,
        headers,
    }
}

/// Builder for a [`KafkaSource`].
#[derive(Default)]
pub struct KafkaSourceBuilder {
    brokers: Option<String>,
    subscription: Option<SubscriptionConfig>,
    session_timeout: Option<Duration>,
}

impl KafkaSourceBuilder {
    /// Set the bootstrap servers (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic, group and consumer flags.
    #[must_use]
    pub fn subscription(mut self, subscription: SubscriptionConfig) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Set the group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Create the consumer and subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers or the
    /// subscription are missing or the client cannot be created, and
    /// [`ChannelError::SubscriptionFailed`] if subscribing fails.
    pub fn build(self) -> Result<KafkaSource, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let config = self.subscription.ok_or_else(|| {
            ChannelError::ConnectionFailed("Subscription not configured".to_string())
        })?;
        let session_timeout = self.session_timeout.unwrap_or(Duration::from_secs(6));

        let consumer: StreamConsumer<PipelineContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", config.auto_offset_reset.as_str())
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("enable.partition.eof", config.enable_partition_eof.to_string())
            .set("session.timeout.ms", session_timeout.as_millis().to_string())
            .set_log_level(RDKafkaLogLevel::Info)
            .create_with_context(PipelineContext::new("consumer"))
            .map_err(|e| ChannelError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| ChannelError::SubscriptionFailed {
                topic: config.topic.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            brokers = %brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            auto_offset_reset = %config.auto_offset_reset,
            enable_auto_commit = config.enable_auto_commit,
            enable_partition_eof = config.enable_partition_eof,
            "Kafka consumer subscribed"
        );

        Ok(KafkaSource {
            consumer: Some(Arc::new(consumer)),
            config,
            next_offsets: HashMap::new(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kafka_source_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<KafkaSource>();
    }

    #[test]
    fn build_requires_brokers() {
        let result = KafkaSource::builder()
            .subscription(SubscriptionConfig::new("booking-request", "g"))
            .build();
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    #[test]
    fn build_requires_subscription() {
        let result = KafkaSource::builder().brokers("localhost:9092").build();
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    fn positions(topic: &str, entries: &[(i32, Offset)]) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        for (partition, offset) in entries {
            list.add_partition_offset(topic, *partition, *offset).unwrap();
        }
        list
    }

    #[test]
    fn eof_offset_prefers_tracked_position() {
        let reported = positions("booking-request", &[(0, Offset::Offset(42))]);
        assert_eq!(eof_offset(Some(50), Some(&reported), "booking-request", 0), 50);
    }

    #[test]
    fn eof_offset_uses_consumer_position_after_restart() {
        let reported = positions(
            "booking-request",
            &[(0, Offset::Offset(42)), (1, Offset::Offset(7))],
        );
        assert_eq!(eof_offset(None, Some(&reported), "booking-request", 0), 42);
        assert_eq!(eof_offset(None, Some(&reported), "booking-request", 1), 7);
    }

    #[test]
    fn eof_offset_without_a_known_position_is_zero() {
        let reported = positions("booking-request", &[(0, Offset::Invalid)]);
        assert_eq!(eof_offset(None, Some(&reported), "booking-request", 0), 0);
        assert_eq!(eof_offset(None, Some(&reported), "booking-request", 3), 0);
        assert_eq!(eof_offset(None, None, "booking-request", 0), 0);
    }

    fn unreachable_source() -> KafkaSource {
        // librdkafka connects lazily, so building needs no running broker.
        KafkaSource::builder()
            .brokers("127.0.0.1:1")
            .subscription(SubscriptionConfig::new("booking-request", "close-test"))
            .session_timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    #[test]
    fn close_outside_a_runtime_releases_inline() {
        let mut source = unreachable_source();
        source.close().unwrap();
        assert!(source.consumer.is_none());
        source.close().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_inside_a_runtime_does_not_block_the_worker() {
        let mut source = unreachable_source();
        source.close().unwrap();
        assert!(source.consumer.is_none());

        let cancel = CancellationToken::new();
        assert_eq!(
            source.poll(&cancel).await,
            PollOutcome::Error(ChannelError::Closed)
        );
        let position = TopicPartitionOffset::new("booking-request", 0, 0);
        assert_eq!(source.commit(&position).await, Err(ChannelError::Closed));
    }
}
