//! Client context routing librdkafka callbacks into `tracing`.

use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::TopicPartitionList;

/// Context shared by every client this crate creates.
///
/// librdkafka reports connection trouble, broker restarts, partition
/// assignment and background commit results through callbacks instead of
/// return values; this context turns them into log events tagged with the
/// client's role.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    role: &'static str,
}

impl PipelineContext {
    /// Context for a client acting as `role` (e.g. `"consumer"`).
    #[must_use]
    pub const fn new(role: &'static str) -> Self {
        Self { role }
    }

    /// The role this context was created for.
    #[must_use]
    pub const fn role(&self) -> &'static str {
        self.role
    }
}

impl ClientContext for PipelineContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                tracing::error!(role = self.role, facility = fac, "{log_message}");
            }
            RDKafkaLogLevel::Warning => {
                tracing::warn!(role = self.role, facility = fac, "{log_message}");
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                tracing::info!(role = self.role, facility = fac, "{log_message}");
            }
            RDKafkaLogLevel::Debug => {
                tracing::debug!(role = self.role, facility = fac, "{log_message}");
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        tracing::error!(role = self.role, error = %error, reason, "Kafka client error");
    }
}

impl ConsumerContext for PipelineContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let (kind, detail) = describe_rebalance(rebalance);
        tracing::debug!(role = self.role, kind, partitions = %detail, "Rebalance starting");
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let (kind, detail) = describe_rebalance(rebalance);
        match rebalance {
            Rebalance::Error(_) => {
                tracing::warn!(role = self.role, error = %detail, "Rebalance failed");
            }
            _ => tracing::debug!(role = self.role, kind, partitions = %detail, "Rebalance done"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => tracing::trace!(role = self.role, offsets = ?offsets, "Offsets committed"),
            Err(e) => tracing::warn!(
                role = self.role,
                offsets = ?offsets,
                error = %e,
                "Offset commit failed"
            ),
        }
    }
}

/// Rebalance kind and its partitions as `topic[partition]`, comma-separated.
fn describe_rebalance(rebalance: &Rebalance<'_>) -> (&'static str, String) {
    let partitions = |list: &TopicPartitionList| {
        list.elements()
            .iter()
            .map(|element| format!("{}[{}]", element.topic(), element.partition()))
            .collect::<Vec<_>>()
            .join(", ")
    };

    match rebalance {
        Rebalance::Assign(list) => ("assign", partitions(list)),
        Rebalance::Revoke(list) => ("revoke", partitions(list)),
        Rebalance::Error(error) => ("error", error.to_string()),
    }
}
