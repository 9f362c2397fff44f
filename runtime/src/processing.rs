//! The booking processing loop.
//!
//! Reads booking requests from one topic, confirms each one and publishes the
//! confirmation to another topic, until cancelled.
//!
//! # State Machine
//!
//! ```text
//! Starting ──yield──► WaitingForRequest ◄──────────────────────────┐
//!                       │    │    │                                │
//!          EOF / error ─┘    │    └─ request ─► Transforming       │
//!          (poll again)      │                    │      │         │
//!                            │            malformed      ▼         │
//!                       cancelled                 │   Publishing ──┤ delivered
//!                            │                    ▼      │         │
//!                            ▼               ErrorRecovered ◄─ failed
//!                        Stopping                 │                │
//!                            │                    └────────────────┘
//!                            ▼
//!                         Stopped
//! ```
//!
//! A single bad request never stops the loop. Malformed payloads are skipped
//! (their offset is already committed) and optionally forwarded to a
//! dead-letter topic. Failed publishes are logged and counted; the request is
//! not retried.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::metrics::LoopMetrics;
use crate::reader::{self, ReadOutcome, Reader, ReaderError};
use crate::writer::{WriteOutcome, Writer};
use booking_pipeline_core::{BookingConfirmation, BookingRequest, ConsumedMessage, MessageSource};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Where the loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Created, not yet polling
    Starting,
    /// Blocked on the reader
    WaitingForRequest,
    /// Decoding a request and building its confirmation
    Transforming,
    /// Waiting for the confirmation's acknowledgment
    Publishing,
    /// A request failed; about to resume waiting
    ErrorRecovered,
    /// Cancelled, releasing the subscription
    Stopping,
    /// Finished
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::WaitingForRequest => "waiting-for-request",
            Self::Transforming => "transforming",
            Self::Publishing => "publishing",
            Self::ErrorRecovered => "error-recovered",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters accumulated over a loop's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Requests decoded and turned into confirmations
    pub requests_processed: u64,
    /// Confirmations the broker acknowledged
    pub confirmations_published: u64,
    /// Confirmations dropped after a failed publish
    pub publish_failures: u64,
    /// Payloads that were not valid booking requests
    pub malformed_requests: u64,
    /// Malformed payloads forwarded to the dead-letter topic
    pub dead_lettered: u64,
    /// Transport errors returned by the reader
    pub transport_errors: u64,
    /// End-of-partition notifications
    pub partition_eofs: u64,
}

/// Whether the loop should keep going after one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Poll again
    Continue,
    /// The reader is closed; the loop is done
    Stop,
}

/// Ties consumption of booking requests to production of confirmations.
pub struct ProcessingLoop<S: MessageSource> {
    reader: Reader<S>,
    confirmations: Writer,
    dead_letters: Option<Writer>,
    backoff: Backoff,
    state: watch::Sender<LoopState>,
    stats: LoopStats,
}

impl<S: MessageSource> ProcessingLoop<S> {
    /// Create a loop reading requests from `reader` and publishing
    /// confirmations through `confirmations`.
    ///
    /// Backoff defaults to [`BackoffPolicy::none()`]; malformed payloads are
    /// only logged unless a dead-letter writer is set.
    #[must_use]
    pub fn new(reader: Reader<S>, confirmations: Writer) -> Self {
        let (state, _) = watch::channel(LoopState::Starting);
        Self {
            reader,
            confirmations,
            dead_letters: None,
            backoff: Backoff::new(BackoffPolicy::none()),
            state,
            stats: LoopStats::default(),
        }
    }

    /// Wait between consecutive failed iterations according to `policy`.
    #[must_use]
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Backoff::new(policy);
        self
    }

    /// Forward payloads that fail to decode through `writer`.
    #[must_use]
    pub fn with_dead_letter_writer(mut self, writer: Writer) -> Self {
        self.dead_letters = Some(writer);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Observe state transitions, e.g. from a health endpoint.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until `cancel` fires, then release the subscription.
    pub async fn run(mut self, cancel: CancellationToken) -> LoopStats {
        tracing::info!(
            request_topic = %self.reader.topic(),
            group_id = %self.reader.group_id(),
            confirmation_topic = %self.confirmations.topic(),
            "Booking processing loop started"
        );

        // Let the rest of the host finish starting before blocking on the reader.
        tokio::task::yield_now().await;

        while self.step(&cancel).await == Step::Continue {}

        self.set_state(LoopState::Stopping);
        self.reader.close();
        self.set_state(LoopState::Stopped);

        tracing::info!(
            processed = self.stats.requests_processed,
            published = self.stats.confirmations_published,
            publish_failures = self.stats.publish_failures,
            malformed = self.stats.malformed_requests,
            transport_errors = self.stats.transport_errors,
            "Booking processing loop stopped"
        );

        self.stats
    }

    /// Run a single iteration: wait for one reader outcome and handle it.
    pub async fn step(&mut self, cancel: &CancellationToken) -> Step {
        self.set_state(LoopState::WaitingForRequest);

        match self.reader.next(cancel).await {
            ReadOutcome::Message(consumed) => {
                let handled = AssertUnwindSafe(self.handle(consumed, cancel))
                    .catch_unwind()
                    .await;
                if let Err(panic) = handled {
                    self.set_state(LoopState::ErrorRecovered);
                    tracing::error!(
                        error = %panic_message(panic.as_ref()),
                        "Error in processing"
                    );
                }
                Step::Continue
            }
            ReadOutcome::EndOfPartition(_) => {
                self.stats.partition_eofs += 1;
                self.backoff.reset();
                Step::Continue
            }
            ReadOutcome::TransportError(_) => {
                self.stats.transport_errors += 1;
                self.backoff.wait(cancel).await;
                Step::Continue
            }
            ReadOutcome::Cancelled | ReadOutcome::Closed => Step::Stop,
        }
    }

    async fn handle(&mut self, consumed: ConsumedMessage, cancel: &CancellationToken) {
        self.set_state(LoopState::Transforming);

        let request: BookingRequest = match reader::decode(&consumed) {
            Ok(request) => request,
            Err(e) => {
                self.recover_malformed(e).await;
                return;
            }
        };

        tracing::info!(
            position = %consumed.position,
            booking = %request,
            "Processing new booking"
        );

        let confirmation = BookingConfirmation::from_request(request);
        self.stats.requests_processed += 1;
        LoopMetrics::record_processed();

        self.set_state(LoopState::Publishing);
        match self.confirmations.write(&confirmation).await {
            WriteOutcome::Delivered(_) => {
                self.stats.confirmations_published += 1;
                LoopMetrics::record_published();
                self.backoff.reset();
            }
            WriteOutcome::Failed(e) => {
                self.set_state(LoopState::ErrorRecovered);
                self.stats.publish_failures += 1;
                LoopMetrics::record_publish_failure();
                tracing::error!(
                    reference_id = %confirmation.reference_id(),
                    error = %e,
                    "Error in processing: confirmation was not delivered"
                );
                self.backoff.wait(cancel).await;
            }
        }
    }

    async fn recover_malformed(&mut self, error: ReaderError) {
        self.set_state(LoopState::ErrorRecovered);
        self.stats.malformed_requests += 1;
        LoopMetrics::record_malformed();
        tracing::error!(error = %error, "Error in processing: malformed booking request");

        let Some(dead_letters) = &self.dead_letters else {
            return;
        };
        let ReaderError::Deserialize { payload, .. } = error;
        if dead_letters.write_raw(payload).await.is_delivered() {
            self.stats.dead_lettered += 1;
            LoopMetrics::record_dead_lettered();
        }
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "Processing loop transition");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic while processing request".to_string()
    }
}
