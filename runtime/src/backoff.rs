//! Exponential backoff with jitter between failed loop iterations.
//!
//! The processing loop re-polls immediately after a transport error or a
//! failed publish unless a policy says otherwise. Under a sustained broker
//! outage that is a busy loop; a [`BackoffPolicy`] spaces the retries out.
//!
//! [`BackoffPolicy::none()`] is the default and never waits.
//!
//! # Example
//!
//! ```rust
//! use booking_pipeline_runtime::backoff::{Backoff, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::builder()
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .jitter(false)
//!     .build();
//!
//! let mut backoff = Backoff::new(policy);
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(200));
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//! ```

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff policy configuration.
///
/// # Default Values
///
/// The default is [`BackoffPolicy::none()`]: zero delay. The builder starts
/// from 100ms initial delay, 30 seconds cap, multiplier 2.0, jitter on.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
    /// Randomize each delay within its upper half
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl BackoffPolicy {
    /// A policy that never waits.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Whether this policy ever waits.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.initial_delay.is_zero()
    }

    /// Delay before the retry following `attempt` consecutive failures,
    /// without jitter.
    ///
    /// delay = `initial_delay` * (multiplier ^ attempt), capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.is_none() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffPolicyBuilder {
    /// Set delay after the first failure. Zero disables backoff.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap for exponential growth.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor. Values below 1.0 are treated as 1.0.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        let multiplier = if self.multiplier.is_nan() || self.multiplier < 1.0 {
            1.0
        } else {
            self.multiplier
        };

        BackoffPolicy {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay.max(self.initial_delay),
            multiplier,
            jitter: self.jitter,
        }
    }
}

/// Consecutive-failure tracker for one loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Start tracking failures under `policy`.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consecutive failures recorded since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.policy.jitter {
            with_jitter(base, &mut rand::thread_rng())
        } else {
            base
        }
    }

    /// Forget previous failures.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record a failure and sleep for the resulting delay.
    ///
    /// Returns early, with `false`, if `cancel` fires during the sleep.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        tracing::debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis(),
            "Backing off before next poll"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = cancel.cancelled() => false,
        }
    }
}

/// Equal jitter: keep half the delay, randomize the other half.
fn with_jitter<R: Rng>(delay: Duration, rng: &mut R) -> Duration {
    let half = delay / 2;
    if half.is_zero() {
        return delay;
    }
    let spread = rng.gen_range(Duration::ZERO..=half);
    half + spread
}
