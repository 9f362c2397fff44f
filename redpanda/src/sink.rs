//! Kafka-backed [`MessageSink`].

use crate::context::PipelineContext;
use booking_pipeline_core::{ChannelError, Message, MessageSink, TopicPartitionOffset};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Publishes messages to Kafka and waits for the delivery report.
///
/// One producer is shared by every writer of the process; it is cheap to
/// share behind an `Arc` and safe to call concurrently.
///
/// # Example
///
/// ```no_run
/// use booking_pipeline_redpanda::KafkaSink;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = KafkaSink::builder()
///     .brokers("localhost:9092")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaSink {
    producer: FutureProducer<PipelineContext>,
    timeout: Duration,
}

impl KafkaSink {
    /// Create a sink with default producer settings.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> KafkaSinkBuilder {
        KafkaSinkBuilder::default()
    }

    /// How long a send waits for its delivery report.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl MessageSink for KafkaSink {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<TopicPartitionOffset, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let headers = message
                .headers
                .iter()
                .fold(OwnedHeaders::new(), |headers, (key, value)| {
                    headers.insert(Header {
                        key,
                        value: Some(value.as_slice()),
                    })
                });

            let record = FutureRecord::to(topic)
                .key(message.key.as_str())
                .payload(message.value.as_str())
                .headers(headers)
                .timestamp(message.timestamp.timestamp_millis());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => Ok(TopicPartitionOffset::new(topic, partition, offset)),
                Err((kafka_error, _)) => Err(ChannelError::PublishFailed {
                    topic: topic.to_string(),
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }
}

/// Builder for a [`KafkaSink`].
#[derive(Default)]
pub struct KafkaSinkBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl KafkaSinkBuilder {
    /// Set the bootstrap servers (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long a send waits for its delivery report.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers are missing or the
    /// producer cannot be created.
    pub fn build(self) -> Result<KafkaSink, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer<PipelineContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .set_log_level(RDKafkaLogLevel::Info)
            .create_with_context(PipelineContext::new("producer"))
            .map_err(|e| ChannelError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Kafka producer created"
        );

        Ok(KafkaSink { producer, timeout })
    }
}
