//! Message envelope and topic positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A position on a topic: partition plus partition-local offset.
///
/// Displayed as `topic [partition] @offset`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl TopicPartitionOffset {
    /// Create a new position.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{}", self.topic, self.partition, self.offset)
    }
}

/// An outgoing or incoming message.
///
/// The key only serves as a partition-routing hint; it carries no business
/// meaning. The value is a UTF-8 JSON document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Routing key
    pub key: String,
    /// JSON payload
    pub value: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Transport headers
    pub headers: HashMap<String, Vec<u8>>,
}

impl Message {
    /// Build a message with a freshly generated key, the current time and no
    /// headers.
    #[must_use]
    pub fn with_fresh_key(value: impl Into<String>) -> Self {
        Self {
            key: Uuid::new_v4().to_string(),
            value: value.into(),
            timestamp: Utc::now(),
            headers: HashMap::new(),
        }
    }
}

/// A message together with the position it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// Where the message was read
    pub position: TopicPartitionOffset,
    /// The message itself
    pub message: Message,
}
