//! Integration tests for the booking processing loop over the in-memory
//! broker.
//!
//! Covers the end-to-end booking flow, recovery from publish failures and
//! malformed requests, cancellation, commit semantics and backoff.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use booking_pipeline_core::{
    AutoOffsetReset, BookingConfirmation, ChannelError, Message, MessageSink, SubscriptionConfig,
    TOPIC_BOOKING_CONFIRMATION, TOPIC_BOOKING_REQUEST, TopicPartitionOffset,
};
use booking_pipeline_runtime::{
    BackoffPolicy, LoopState, ProcessingLoop, ReadOutcome, Reader, Step, Writer,
};
use booking_pipeline_testing::{InMemoryBroker, InMemorySource, fixtures, init_tracing};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Fixtures
// ============================================================================

const PROCESSING_GROUP: &str = "booking-processing";
const DEAD_LETTER_TOPIC: &str = "booking-request-dlq";

fn request_subscription() -> SubscriptionConfig {
    SubscriptionConfig::new(TOPIC_BOOKING_REQUEST, PROCESSING_GROUP)
        .auto_offset_reset(AutoOffsetReset::Earliest)
        .enable_auto_commit(false)
}

fn processing_loop(broker: &InMemoryBroker) -> ProcessingLoop<InMemorySource> {
    let reader = Reader::new(broker.subscribe(request_subscription()));
    let writer = Writer::new(broker.sink(), TOPIC_BOOKING_CONFIRMATION);
    ProcessingLoop::new(reader, writer)
}

fn confirmations(broker: &InMemoryBroker) -> Vec<BookingConfirmation> {
    broker
        .messages(TOPIC_BOOKING_CONFIRMATION)
        .iter()
        .map(|consumed| serde_json::from_str(&consumed.message.value).unwrap())
        .collect()
}

/// A sink whose every publish panics.
struct PanickingSink;

impl MessageSink for PanickingSink {
    fn send<'a>(
        &'a self,
        _topic: &'a str,
        _message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<TopicPartitionOffset, ChannelError>> + Send + 'a>>
    {
        Box::pin(async { panic!("sink exploded") })
    }
}

// ============================================================================
// End-to-End
// ============================================================================

#[tokio::test]
async fn dune_request_is_confirmed_end_to_end() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(processing_loop(&broker).run(cancel.clone()));

    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);

    let published = broker
        .wait_for_messages(TOPIC_BOOKING_CONFIRMATION, 1, Duration::from_secs(5))
        .await;
    assert_eq!(published.len(), 1, "no confirmation within 5 seconds");

    let confirmation: BookingConfirmation =
        serde_json::from_str(&published[0].message.value).unwrap();
    assert_eq!(confirmation.request(), &fixtures::dune());
    assert!((10.0..50.0).contains(&confirmation.price()));
    assert!((1..100).contains(&confirmation.seat_number()));

    let json: serde_json::Value = serde_json::from_str(&published[0].message.value).unwrap();
    assert_eq!(json["movieName"], "Dune");
    assert_eq!(json["cinema"], 3);
    assert_eq!(json["screeningTime"], "2024-01-01T20:00:00Z");
    assert!(json["referenceId"].is_string());

    cancel.cancel();
    let stats = handle.await.unwrap();
    assert_eq!(stats.requests_processed, 1);
    assert_eq!(stats.confirmations_published, 1);
}

#[tokio::test]
async fn every_request_gets_its_own_confirmation() {
    let broker = InMemoryBroker::with_partitions(3);
    for cinema in 1..=5 {
        let request = fixtures::booking("Arrival", cinema, "2024-02-02T18:30:00+01:00");
        broker.publish(TOPIC_BOOKING_REQUEST, serde_json::to_string(&request).unwrap());
    }

    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();
    for _ in 0..5 {
        assert_eq!(processing.step(&cancel).await, Step::Continue);
    }

    let confirmed = confirmations(&broker);
    assert_eq!(confirmed.len(), 5);

    let mut cinemas: Vec<i32> = confirmed.iter().map(|c| c.request().cinema()).collect();
    cinemas.sort_unstable();
    assert_eq!(cinemas, vec![1, 2, 3, 4, 5]);

    let mut ids: Vec<_> = confirmed.iter().map(BookingConfirmation::reference_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

// ============================================================================
// Failure Recovery
// ============================================================================

#[tokio::test]
async fn failed_publish_is_dropped_and_next_request_succeeds() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();

    broker.set_publish_failure(TOPIC_BOOKING_CONFIRMATION, true);
    broker.publish(
        TOPIC_BOOKING_REQUEST,
        serde_json::to_string(&fixtures::booking("Heat", 1, "2024-03-01T21:00:00Z")).unwrap(),
    );
    assert_eq!(processing.step(&cancel).await, Step::Continue);
    assert_eq!(processing.state(), LoopState::ErrorRecovered);
    assert!(broker.messages(TOPIC_BOOKING_CONFIRMATION).is_empty());

    broker.set_publish_failure(TOPIC_BOOKING_CONFIRMATION, false);
    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);
    assert_eq!(processing.step(&cancel).await, Step::Continue);

    let confirmed = confirmations(&broker);
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].request().movie_name(), "Dune");

    let stats = processing.stats();
    assert_eq!(stats.requests_processed, 2);
    assert_eq!(stats.publish_failures, 1);
    assert_eq!(stats.confirmations_published, 1);
}

#[tokio::test]
async fn malformed_request_is_skipped_and_dead_lettered() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker)
        .with_dead_letter_writer(Writer::new(broker.sink(), DEAD_LETTER_TOPIC));
    let cancel = CancellationToken::new();

    broker.publish(TOPIC_BOOKING_REQUEST, "not a booking");
    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);

    processing.step(&cancel).await;
    processing.step(&cancel).await;

    let stats = processing.stats();
    assert_eq!(stats.malformed_requests, 1);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.confirmations_published, 1);

    let dead = broker.messages(DEAD_LETTER_TOPIC);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.value, "not a booking");

    // Both offsets are committed; the bad payload is not redelivered.
    assert_eq!(
        broker.committed_offset(PROCESSING_GROUP, TOPIC_BOOKING_REQUEST, 0),
        Some(2)
    );
}

#[tokio::test]
async fn malformed_request_without_dead_letter_writer_is_only_counted() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();

    broker.publish(TOPIC_BOOKING_REQUEST, r#"{"movieName":"Dune"}"#);
    processing.step(&cancel).await;

    assert_eq!(processing.state(), LoopState::ErrorRecovered);
    assert_eq!(processing.stats().malformed_requests, 1);
    assert_eq!(processing.stats().dead_lettered, 0);
    assert!(broker.messages(TOPIC_BOOKING_CONFIRMATION).is_empty());
}

#[tokio::test]
async fn panic_while_handling_does_not_stop_the_loop() {
    let broker = InMemoryBroker::new();
    let reader = Reader::new(broker.subscribe(request_subscription()));
    let writer = Writer::new(Arc::new(PanickingSink), TOPIC_BOOKING_CONFIRMATION);
    let mut processing = ProcessingLoop::new(reader, writer);
    let cancel = CancellationToken::new();

    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);
    assert_eq!(processing.step(&cancel).await, Step::Continue);
    assert_eq!(processing.state(), LoopState::ErrorRecovered);

    cancel.cancel();
    assert_eq!(processing.step(&cancel).await, Step::Stop);
}

#[tokio::test]
async fn transport_errors_are_counted_and_polling_resumes() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();

    broker.inject_poll_errors(TOPIC_BOOKING_REQUEST, 2);
    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);

    for _ in 0..3 {
        assert_eq!(processing.step(&cancel).await, Step::Continue);
    }

    let stats = processing.stats();
    assert_eq!(stats.transport_errors, 2);
    assert_eq!(stats.confirmations_published, 1);
}

#[tokio::test]
async fn backoff_delays_consecutive_failures() {
    let broker = InMemoryBroker::new();
    let policy = BackoffPolicy::builder()
        .initial_delay(Duration::from_millis(40))
        .multiplier(2.0)
        .jitter(false)
        .build();
    let mut processing = processing_loop(&broker).with_backoff(policy);
    let cancel = CancellationToken::new();

    broker.inject_poll_errors(TOPIC_BOOKING_REQUEST, 2);
    let started = Instant::now();
    processing.step(&cancel).await;
    processing.step(&cancel).await;

    // 40ms after the first failure, 80ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn no_backoff_by_default() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();

    broker.inject_poll_errors(TOPIC_BOOKING_REQUEST, 5);
    let started = Instant::now();
    for _ in 0..5 {
        processing.step(&cancel).await;
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn end_of_partition_is_counted() {
    let broker = InMemoryBroker::new();
    let reader = Reader::new(broker.subscribe(request_subscription().enable_partition_eof(true)));
    let mut processing =
        ProcessingLoop::new(reader, Writer::new(broker.sink(), TOPIC_BOOKING_CONFIRMATION));
    let cancel = CancellationToken::new();

    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);
    processing.step(&cancel).await;
    processing.step(&cancel).await;

    let stats = processing.stats();
    assert_eq!(stats.confirmations_published, 1);
    assert_eq!(stats.partition_eofs, 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancellation_stops_a_blocked_loop_promptly() {
    let broker = InMemoryBroker::new();
    let processing = processing_loop(&broker);
    let mut state = processing.subscribe_state();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(processing.run(cancel.clone()));

    state
        .wait_for(|s| *s == LoopState::WaitingForRequest)
        .await
        .unwrap();
    assert_eq!(broker.active_subscriptions(), 1);

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not stop within a second")
        .unwrap();

    assert_eq!(*state.borrow(), LoopState::Stopped);
    assert_eq!(stats.requests_processed, 0);
    assert_eq!(broker.active_subscriptions(), 0);
}

#[tokio::test]
async fn already_cancelled_loop_stops_without_reading() {
    let broker = InMemoryBroker::new();
    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = processing_loop(&broker).run(cancel).await;

    assert_eq!(stats.requests_processed, 0);
    assert!(broker.messages(TOPIC_BOOKING_CONFIRMATION).is_empty());
}

#[tokio::test]
async fn cancelled_reader_reports_closed_afterwards() {
    let broker = InMemoryBroker::new();
    let mut reader = Reader::new(broker.subscribe(request_subscription()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    assert_eq!(reader.next(&cancel).await, ReadOutcome::Cancelled);
    assert!(reader.is_closed());

    let started = Instant::now();
    assert_eq!(reader.next(&CancellationToken::new()).await, ReadOutcome::Closed);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(broker.active_subscriptions(), 0);
}

// ============================================================================
// Commit Semantics
// ============================================================================

#[tokio::test]
async fn manual_commit_prevents_redelivery_after_a_crash() {
    let broker = InMemoryBroker::new();
    broker.publish(TOPIC_BOOKING_REQUEST, "first");
    let cancel = CancellationToken::new();

    let mut reader = Reader::new(broker.subscribe(request_subscription()));
    assert_eq!(reader.wait_and_read(&cancel).await.as_deref(), Some("first"));
    // Process dies without closing its subscription.
    std::mem::forget(reader);

    broker.publish(TOPIC_BOOKING_REQUEST, "second");
    let mut restarted = Reader::new(broker.subscribe(request_subscription()));
    assert_eq!(restarted.wait_and_read(&cancel).await.as_deref(), Some("second"));
}

#[tokio::test]
async fn auto_commit_redelivers_after_a_crash() {
    let broker = InMemoryBroker::new();
    broker.publish(TOPIC_BOOKING_REQUEST, "first");
    let cancel = CancellationToken::new();
    let config = request_subscription().enable_auto_commit(true);

    let mut reader = Reader::new(broker.subscribe(config.clone()));
    assert_eq!(reader.wait_and_read(&cancel).await.as_deref(), Some("first"));
    std::mem::forget(reader);

    let mut restarted = Reader::new(broker.subscribe(config));
    assert_eq!(restarted.wait_and_read(&cancel).await.as_deref(), Some("first"));
}

#[tokio::test]
async fn diagnostic_group_sees_requests_independently() {
    let broker = InMemoryBroker::new();
    let mut processing = processing_loop(&broker);
    let cancel = CancellationToken::new();

    broker.publish(TOPIC_BOOKING_REQUEST, fixtures::DUNE_JSON);
    processing.step(&cancel).await;

    let mut console = Reader::new(
        broker.subscribe(
            SubscriptionConfig::new(TOPIC_BOOKING_REQUEST, "booking-console")
                .auto_offset_reset(AutoOffsetReset::Earliest)
                .enable_partition_eof(true),
        ),
    );
    assert_eq!(
        console.wait_and_read(&cancel).await.as_deref(),
        Some(fixtures::DUNE_JSON)
    );
    assert!(matches!(
        console.next(&cancel).await,
        ReadOutcome::EndOfPartition(_)
    ));
    assert_eq!(
        broker.committed_offset(PROCESSING_GROUP, TOPIC_BOOKING_REQUEST, 0),
        Some(1)
    );
}
