//! Cancellable, commit-after-read consumption of one topic.
//!
//! A [`Reader`] owns one [`MessageSource`] and hands out one message per call.
//! Each call ends in exactly one [`ReadOutcome`]:
//!
//! | source reports        | outcome                 | side effect                         |
//! |-----------------------|-------------------------|-------------------------------------|
//! | message               | `Message`               | sync commit if auto-commit is off   |
//! | end of partition      | `EndOfPartition`        | logged                              |
//! | cancellation          | `Cancelled`             | unsubscribe and release the source  |
//! | transport error       | `TransportError`        | logged and counted                  |
//! | (source released)     | `Closed`                | none, returns immediately           |
//!
//! # Delivery Semantics
//!
//! With auto-commit disabled the consumed position is committed before the
//! message is handed out. A crash between consume and commit redelivers the
//! message to the next subscription in the group; a crash after the commit
//! means the message counts as read even if the caller never processed it.

use crate::metrics::ReaderMetrics;
use booking_pipeline_core::{
    ChannelError, ConsumedMessage, MessageSource, PollOutcome, TopicPartitionOffset,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result of one [`Reader::next`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A message was consumed (and committed, if auto-commit is off)
    Message(ConsumedMessage),
    /// The partition has no further messages at this position
    EndOfPartition(TopicPartitionOffset),
    /// The cancellation token fired; the subscription has been closed
    Cancelled,
    /// The reader was closed by an earlier call
    Closed,
    /// The transport reported an error; the caller may simply call again
    TransportError(ChannelError),
}

impl ReadOutcome {
    /// The payload, if this outcome carries a message.
    #[must_use]
    pub fn into_payload(self) -> Option<String> {
        match self {
            Self::Message(consumed) => Some(consumed.message.value),
            _ => None,
        }
    }
}

/// Errors surfaced by typed reads.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// A message was present but its payload does not match the expected shape
    #[error("Failed to deserialize payload at {position}: {source}")]
    Deserialize {
        /// Where the message was read
        position: TopicPartitionOffset,
        /// The raw payload
        payload: String,
        /// The decoding error
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a consumed message's JSON payload.
///
/// # Errors
///
/// Returns [`ReaderError::Deserialize`] carrying the raw payload if it does not
/// match `T`.
pub fn decode<T: DeserializeOwned>(consumed: &ConsumedMessage) -> Result<T, ReaderError> {
    serde_json::from_str(&consumed.message.value).map_err(|source| ReaderError::Deserialize {
        position: consumed.position.clone(),
        payload: consumed.message.value.clone(),
        source,
    })
}

/// Consumes one topic through a [`MessageSource`].
pub struct Reader<S: MessageSource> {
    source: Option<S>,
    topic: String,
    group_id: String,
}

impl<S: MessageSource> Reader<S> {
    /// Wrap a subscription.
    #[must_use]
    pub fn new(source: S) -> Self {
        let topic = source.config().topic.clone();
        let group_id = source.config().group_id.clone();

        tracing::debug!(
            topic = %topic,
            group_id = %group_id,
            auto_commit = source.config().enable_auto_commit,
            partition_eof = source.config().enable_partition_eof,
            "Reader created"
        );

        Self {
            source: Some(source),
            topic,
            group_id,
        }
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Whether the subscription has been released.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Wait for the next message, end-of-partition, transport error or
    /// cancellation.
    ///
    /// After a `Cancelled` outcome the subscription is gone and every further
    /// call returns `Closed` without waiting.
    pub async fn next(&mut self, cancel: &CancellationToken) -> ReadOutcome {
        let outcome = match self.source.as_mut() {
            Some(source) => source.poll(cancel).await,
            None => {
                tracing::debug!(topic = %self.topic, "Read attempted on a closed reader");
                return ReadOutcome::Closed;
            }
        };

        match outcome {
            PollOutcome::Message(consumed) => {
                tracing::info!(
                    position = %consumed.position,
                    "Consumed new message"
                );
                ReaderMetrics::record_consume(&self.topic);
                self.commit_if_manual(&consumed.position).await;
                ReadOutcome::Message(consumed)
            }
            PollOutcome::PartitionEof(position) => {
                tracing::info!(
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "EOF reached"
                );
                ReaderMetrics::record_eof(&self.topic);
                ReadOutcome::EndOfPartition(position)
            }
            PollOutcome::Cancelled => {
                tracing::info!(topic = %self.topic, "Closing consumer");
                self.close();
                ReadOutcome::Cancelled
            }
            PollOutcome::Error(error) => {
                tracing::error!(
                    topic = %self.topic,
                    error = %error,
                    "Consumer error"
                );
                ReaderMetrics::record_transport_error(&self.topic);
                ReadOutcome::TransportError(error)
            }
        }
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` for everything that is not a real message: end of
    /// partition, transport errors and cancellation.
    pub async fn wait_and_read(&mut self, cancel: &CancellationToken) -> Option<String> {
        self.next(cancel).await.into_payload()
    }

    /// Wait for the next payload and decode it as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Deserialize`] if a message arrived but its
    /// payload is not a valid `T`. The message has already been committed
    /// (with auto-commit off) and will not be redelivered.
    pub async fn wait_and_read_as<T: DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ReaderError> {
        match self.next(cancel).await {
            ReadOutcome::Message(consumed) => decode(&consumed).map(Some),
            _ => Ok(None),
        }
    }

    /// Unsubscribe and release the source. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                tracing::warn!(
                    topic = %self.topic,
                    error = %e,
                    "Failed to close subscription cleanly"
                );
            }
        }
    }

    async fn commit_if_manual(&mut self, position: &TopicPartitionOffset) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        if source.config().enable_auto_commit {
            return;
        }

        if let Err(e) = source.commit(position).await {
            // The message is still handed out; it may be delivered again.
            tracing::warn!(
                position = %position,
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
            ReaderMetrics::record_commit_failure(&self.topic);
        }
    }
}

impl<S: MessageSource> Drop for Reader<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use booking_pipeline_core::{Message, SubscriptionConfig};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Journal {
        commits: Vec<TopicPartitionOffset>,
        closed: usize,
    }

    struct ScriptedSource {
        config: SubscriptionConfig,
        script: VecDeque<PollOutcome>,
        journal: Arc<Mutex<Journal>>,
        fail_commits: bool,
        commit_latency: Duration,
    }

    impl ScriptedSource {
        fn new(config: SubscriptionConfig, script: Vec<PollOutcome>) -> (Self, Arc<Mutex<Journal>>) {
            let journal = Arc::new(Mutex::new(Journal::default()));
            let source = Self {
                config,
                script: script.into(),
                journal: Arc::clone(&journal),
                fail_commits: false,
                commit_latency: Duration::ZERO,
            };
            (source, journal)
        }
    }

    impl MessageSource for ScriptedSource {
        fn config(&self) -> &SubscriptionConfig {
            &self.config
        }

        fn poll<'a>(
            &'a mut self,
            cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = PollOutcome> + Send + 'a>> {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return PollOutcome::Cancelled;
                }
                match self.script.pop_front() {
                    Some(outcome) => outcome,
                    None => {
                        cancel.cancelled().await;
                        PollOutcome::Cancelled
                    }
                }
            })
        }

        fn commit<'a>(
            &'a mut self,
            position: &'a TopicPartitionOffset,
        ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
            Box::pin(async move {
                if !self.commit_latency.is_zero() {
                    tokio::time::sleep(self.commit_latency).await;
                }
                if self.fail_commits {
                    return Err(ChannelError::CommitFailed {
                        position: position.clone(),
                        reason: "coordinator unavailable".to_string(),
                    });
                }
                self.journal.lock().unwrap().commits.push(position.clone());
                Ok(())
            })
        }

        fn close(&mut self) -> Result<(), ChannelError> {
            self.journal.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    fn message(offset: i64, value: &str) -> PollOutcome {
        PollOutcome::Message(ConsumedMessage {
            position: TopicPartitionOffset::new("booking-request", 0, offset),
            message: Message::with_fresh_key(value),
        })
    }

    fn manual() -> SubscriptionConfig {
        SubscriptionConfig::new("booking-request", "test").enable_auto_commit(false)
    }

    #[tokio::test]
    async fn commits_before_returning_when_auto_commit_is_off() {
        let (source, journal) = ScriptedSource::new(manual(), vec![message(7, "{}")]);
        let mut reader = Reader::new(source);
        assert_eq!(reader.topic(), "booking-request");
        assert_eq!(reader.group_id(), "test");

        let payload = reader.wait_and_read(&CancellationToken::new()).await;

        assert_eq!(payload.as_deref(), Some("{}"));
        assert_eq!(
            journal.lock().unwrap().commits,
            vec![TopicPartitionOffset::new("booking-request", 0, 7)]
        );
    }

    #[tokio::test]
    async fn does_not_commit_when_auto_commit_is_on() {
        let config = SubscriptionConfig::new("booking-request", "test");
        let (source, journal) = ScriptedSource::new(config, vec![message(0, "{}")]);
        let mut reader = Reader::new(source);

        assert!(reader.wait_and_read(&CancellationToken::new()).await.is_some());
        assert!(journal.lock().unwrap().commits.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_commit_does_not_stall_other_tasks() {
        let (mut source, journal) = ScriptedSource::new(manual(), vec![message(4, "{}")]);
        source.commit_latency = Duration::from_millis(300);
        let mut reader = Reader::new(source);

        let started = tokio::time::Instant::now();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        });

        let payload = reader.wait_and_read(&CancellationToken::new()).await;
        let ticked_after = ticker.await.unwrap();

        assert_eq!(payload.as_deref(), Some("{}"));
        assert_eq!(journal.lock().unwrap().commits.len(), 1);
        assert!(
            ticked_after < Duration::from_millis(200),
            "timer task woke after {ticked_after:?}"
        );
    }

    #[tokio::test]
    async fn commit_failure_still_returns_payload() {
        let (mut source, _journal) = ScriptedSource::new(manual(), vec![message(1, "{\"a\":1}")]);
        source.fail_commits = true;
        let mut reader = Reader::new(source);

        let payload = reader.wait_and_read(&CancellationToken::new()).await;
        assert_eq!(payload.as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn eof_and_transport_errors_yield_no_message() {
        let (source, _journal) = ScriptedSource::new(
            manual().enable_partition_eof(true),
            vec![
                PollOutcome::PartitionEof(TopicPartitionOffset::new("booking-request", 0, 3)),
                PollOutcome::Error(ChannelError::TransportError("broker down".to_string())),
            ],
        );
        let mut reader = Reader::new(source);
        let cancel = CancellationToken::new();

        assert_eq!(
            reader.next(&cancel).await,
            ReadOutcome::EndOfPartition(TopicPartitionOffset::new("booking-request", 0, 3))
        );
        assert!(reader.wait_and_read(&cancel).await.is_none());
        assert!(!reader.is_closed());
    }

    #[tokio::test]
    async fn cancellation_closes_once_and_later_calls_fail_fast() {
        let (source, journal) = ScriptedSource::new(manual(), vec![]);
        let mut reader = Reader::new(source);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(reader.next(&cancel).await, ReadOutcome::Cancelled);
        assert!(reader.is_closed());
        assert_eq!(reader.next(&cancel).await, ReadOutcome::Closed);
        assert_eq!(reader.next(&CancellationToken::new()).await, ReadOutcome::Closed);

        drop(reader);
        assert_eq!(journal.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn typed_read_distinguishes_absent_from_malformed() {
        #[derive(serde::Deserialize, Debug)]
        struct Shape {
            #[allow(dead_code)]
            a: u32,
        }

        let (source, _journal) = ScriptedSource::new(
            manual(),
            vec![
                message(0, "{\"a\":1}"),
                message(1, "not json"),
                PollOutcome::Error(ChannelError::TransportError("hiccup".to_string())),
            ],
        );
        let mut reader = Reader::new(source);
        let cancel = CancellationToken::new();

        assert!(reader.wait_and_read_as::<Shape>(&cancel).await.unwrap().is_some());

        let err = reader.wait_and_read_as::<Shape>(&cancel).await.unwrap_err();
        let ReaderError::Deserialize { position, payload, .. } = err;
        assert_eq!(position.offset, 1);
        assert_eq!(payload, "not json");

        assert!(reader.wait_and_read_as::<Shape>(&cancel).await.unwrap().is_none());
    }
}
