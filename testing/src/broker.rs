//! In-memory message broker.
//!
//! Provides a fast, deterministic stand-in for Kafka with the properties the
//! pipeline depends on:
//!
//! - topics split into a fixed number of partitions, keys hashed to partitions
//! - per-group committed offsets (the committed offset is the next one to read)
//! - `earliest` / `latest` start positions for groups without commits
//! - end-of-partition notifications, once per time a partition is caught up
//! - auto-commit that only lands on the next poll or on close, so dropping a
//!   source without closing it behaves like a crash
//! - fault injection for publishes and polls
//!
//! # Example
//!
//! ```
//! use booking_pipeline_core::{CancellationToken, PollOutcome, MessageSource, SubscriptionConfig};
//! use booking_pipeline_testing::InMemoryBroker;
//!
//! # async fn example() {
//! let broker = InMemoryBroker::new();
//! broker.publish("booking-request", "{}");
//!
//! let mut source = broker.subscribe(SubscriptionConfig::new("booking-request", "group")
//!     .auto_offset_reset(booking_pipeline_core::AutoOffsetReset::Earliest));
//! let outcome = source.poll(&CancellationToken::new()).await;
//! assert!(matches!(outcome, PollOutcome::Message(_)));
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use booking_pipeline_core::{
    AutoOffsetReset, ChannelError, ConsumedMessage, Message, MessageSink, MessageSource,
    PollOutcome, SubscriptionConfig, TopicPartitionOffset,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type GroupKey = (String, String, i32);

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Message>>>,
    committed: HashMap<GroupKey, i64>,
    unavailable: HashSet<String>,
    poll_faults: HashMap<String, usize>,
    active_subscriptions: usize,
}

impl BrokerState {
    fn partitions_mut(&mut self, topic: &str, count: i32) -> &mut Vec<Vec<Message>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partition_count(count)])
    }

    fn log_len(&self, topic: &str, partition: i32) -> i64 {
        self.topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition_index(partition)))
            .map_or(0, |log| i64::try_from(log.len()).unwrap_or(i64::MAX))
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    partitions: i32,
}

/// A shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker whose topics have a single partition.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker whose topics have `partitions` partitions (at least one).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    /// This broker as a shareable [`MessageSink`].
    #[must_use]
    pub fn sink(&self) -> Arc<dyn MessageSink> {
        Arc::new(self.clone())
    }

    /// Open a subscription.
    ///
    /// Each partition starts at the group's committed offset, or at the
    /// configured reset position when the group has none.
    #[must_use]
    pub fn subscribe(&self, config: SubscriptionConfig) -> InMemorySource {
        let mut state = self.shared.state.lock().unwrap();
        state.partitions_mut(&config.topic, self.shared.partitions);
        state.active_subscriptions += 1;

        let positions = (0..self.shared.partitions)
            .map(|partition| {
                let key = (config.group_id.clone(), config.topic.clone(), partition);
                let start = state.committed.get(&key).copied().unwrap_or_else(|| {
                    match config.auto_offset_reset {
                        AutoOffsetReset::Earliest => 0,
                        AutoOffsetReset::Latest => state.log_len(&config.topic, partition),
                    }
                });
                (partition, start)
            })
            .collect();
        drop(state);

        InMemorySource {
            shared: Arc::clone(&self.shared),
            config,
            positions,
            uncommitted: HashMap::new(),
            eof_reported: HashMap::new(),
            next_partition: 0,
            closed: false,
        }
    }

    /// Append a message under a fresh key, bypassing publish faults.
    pub fn publish(&self, topic: &str, value: impl Into<String>) -> TopicPartitionOffset {
        self.append(topic, Message::with_fresh_key(value))
    }

    /// Every message on `topic`, partition by partition.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.shared.state.lock().unwrap();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, message)| ConsumedMessage {
                    position: TopicPartitionOffset::new(
                        topic,
                        i32::try_from(partition).unwrap(),
                        i64::try_from(offset).unwrap(),
                    ),
                    message: message.clone(),
                })
            })
            .collect()
    }

    /// Wait until `topic` holds at least `count` messages or `timeout` passes,
    /// then return whatever is there.
    pub async fn wait_for_messages(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<ConsumedMessage> {
        let waiting = async {
            loop {
                let notified = self.shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.messages(topic).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(timeout, waiting).await;
        self.messages(topic)
    }

    /// Committed offset of `group` on a partition (the next offset it reads).
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.shared.state.lock().unwrap();
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Make publishes to `topic` fail (or succeed again).
    pub fn set_publish_failure(&self, topic: &str, failing: bool) {
        let mut state = self.shared.state.lock().unwrap();
        if failing {
            state.unavailable.insert(topic.to_string());
        } else {
            state.unavailable.remove(topic);
        }
    }

    /// Make the next `count` polls on `topic` return a transport error.
    pub fn inject_poll_errors(&self, topic: &str, count: usize) {
        {
            let mut state = self.shared.state.lock().unwrap();
            *state.poll_faults.entry(topic.to_string()).or_default() += count;
        }
        self.shared.notify.notify_waiters();
    }

    /// Subscriptions neither closed nor dropped.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.shared.state.lock().unwrap().active_subscriptions
    }

    fn append(&self, topic: &str, message: Message) -> TopicPartitionOffset {
        let position = {
            let mut state = self.shared.state.lock().unwrap();
            let partitions = state.partitions_mut(topic, self.shared.partitions);
            let partition = partition_for(&message.key, self.shared.partitions);
            let log = &mut partitions[partition_index(partition)];
            log.push(message);
            TopicPartitionOffset::new(topic, partition, i64::try_from(log.len() - 1).unwrap())
        };
        self.shared.notify.notify_waiters();
        position
    }
}

impl MessageSink for InMemoryBroker {
    fn send<'a>(
        &'a self,
        topic: &'a str,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<TopicPartitionOffset, ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            let unavailable = self.shared.state.lock().unwrap().unavailable.contains(topic);
            if unavailable {
                return Err(ChannelError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "broker unreachable".to_string(),
                });
            }
            Ok(self.append(topic, message))
        })
    }
}

/// A subscription on an [`InMemoryBroker`].
pub struct InMemorySource {
    shared: Arc<Shared>,
    config: SubscriptionConfig,
    positions: HashMap<i32, i64>,
    uncommitted: HashMap<i32, i64>,
    eof_reported: HashMap<i32, i64>,
    next_partition: i32,
    closed: bool,
}

impl InMemorySource {
    /// Next offset this subscription reads on `partition`.
    #[must_use]
    pub fn position(&self, partition: i32) -> Option<i64> {
        self.positions.get(&partition).copied()
    }

    fn try_next(&mut self) -> Option<PollOutcome> {
        if self.closed {
            return Some(PollOutcome::Error(ChannelError::Closed));
        }

        let mut state = self.shared.state.lock().unwrap();

        if self.config.enable_auto_commit {
            for (partition, next) in self.uncommitted.drain() {
                let key = (self.config.group_id.clone(), self.config.topic.clone(), partition);
                state.committed.insert(key, next);
            }
        }

        if let Some(remaining) = state.poll_faults.get_mut(&self.config.topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(PollOutcome::Error(ChannelError::TransportError(
                    "injected poll failure".to_string(),
                )));
            }
        }

        let partitions = self.shared.partitions;
        for step in 0..partitions {
            let partition = (self.next_partition + step) % partitions;
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let message = state
                .topics
                .get(&self.config.topic)
                .and_then(|logs| logs.get(partition_index(partition)))
                .and_then(|log| log.get(usize::try_from(position).ok()?))
                .cloned();

            if let Some(message) = message {
                self.positions.insert(partition, position + 1);
                self.uncommitted.insert(partition, position + 1);
                self.next_partition = (partition + 1) % partitions;
                return Some(PollOutcome::Message(ConsumedMessage {
                    position: TopicPartitionOffset::new(&self.config.topic, partition, position),
                    message,
                }));
            }
        }

        if self.config.enable_partition_eof {
            for partition in 0..partitions {
                let position = self.positions.get(&partition).copied().unwrap_or(0);
                if self.eof_reported.get(&partition) != Some(&position) {
                    self.eof_reported.insert(partition, position);
                    return Some(PollOutcome::PartitionEof(TopicPartitionOffset::new(
                        &self.config.topic,
                        partition,
                        position,
                    )));
                }
            }
        }

        None
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.shared.state.lock().unwrap();
            state.active_subscriptions = state.active_subscriptions.saturating_sub(1);
        }
    }
}

impl MessageSource for InMemorySource {
    fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    fn poll<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = PollOutcome> + Send + 'a>> {
        Box::pin(async move {
            loop {
                if cancel.is_cancelled() {
                    return PollOutcome::Cancelled;
                }

                let shared = Arc::clone(&self.shared);
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(outcome) = self.try_next() {
                    return outcome;
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return PollOutcome::Cancelled,
                    () = &mut notified => {}
                }
            }
        })
    }

    fn commit<'a>(
        &'a mut self,
        position: &'a TopicPartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed {
                return Err(ChannelError::Closed);
            }
            let key = (
                self.config.group_id.clone(),
                position.topic.clone(),
                position.partition,
            );
            self.shared
                .state
                .lock()
                .unwrap()
                .committed
                .insert(key, position.offset + 1);
            self.uncommitted.remove(&position.partition);
            Ok(())
        })
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        if self.config.enable_auto_commit {
            let mut state = self.shared.state.lock().unwrap();
            for (partition, next) in self.uncommitted.drain() {
                let key = (self.config.group_id.clone(), self.config.topic.clone(), partition);
                state.committed.insert(key, next);
            }
        }
        self.release();
        Ok(())
    }
}

impl Drop for InMemorySource {
    fn drop(&mut self) {
        // Dropped without close: nothing pending is committed.
        self.release();
    }
}

fn partition_for(key: &str, partitions: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let bucket = hasher.finish() % u64::from(partitions.unsigned_abs().max(1));
    i32::try_from(bucket).unwrap_or(0)
}

fn partition_count(partitions: i32) -> usize {
    usize::try_from(partitions.max(1)).unwrap_or(1)
}

fn partition_index(partition: i32) -> usize {
    usize::try_from(partition).unwrap_or(0)
}
