//! # Booking Pipeline Runtime
//!
//! The moving parts of the booking pipeline, independent of any particular
//! broker:
//!
//! - [`Reader`]: cancellable "wait for the next message" over a
//!   [`MessageSource`](booking_pipeline_core::MessageSource), committing after
//!   each read when auto-commit is off
//! - [`Writer`]: publishes one JSON payload per call under a fresh key and
//!   waits for the broker's acknowledgment
//! - [`ProcessingLoop`]: reads booking requests, confirms them, publishes the
//!   confirmations, and survives every per-message failure
//! - [`backoff`]: optional exponential backoff with jitter between failed
//!   iterations
//! - [`metrics`]: counters for every outcome the components report
//!
//! ## Failure Policy
//!
//! Nothing in this crate raises to the caller on a broker hiccup. The Reader
//! and Writer return typed outcomes ([`ReadOutcome`], [`WriteOutcome`]); the
//! loop logs them, counts them and keeps going. Only cancellation stops it.

pub mod backoff;
pub mod metrics;
pub mod processing;
pub mod reader;
pub mod writer;

pub use backoff::{Backoff, BackoffPolicy};
pub use processing::{LoopState, LoopStats, ProcessingLoop, Step};
pub use reader::{ReadOutcome, Reader, ReaderError};
pub use writer::{WriteOutcome, Writer};
