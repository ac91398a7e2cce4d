//! Retry logic with exponential backoff
//!
//! This module classifies failures as retryable or terminal ([`IsRetryable`]) and runs
//! async operations under a bounded, cancellable retry loop ([`RetryPolicy`]).
//! Delays grow exponentially, are capped at `max_delay`, get an extra factor for
//! rate-limit-class failures (403/429) and optional jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use chapter_dl::retry::{IsRetryable, RetryOutcome, RetryPolicy};
//! use chapter_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let run = policy
//!     .run(&cancel, |_attempt| async { Ok::<_, MyError>(42) })
//!     .await;
//! assert!(matches!(run.outcome, RetryOutcome::Succeeded(42)));
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (not found, challenge pages, disk full) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns true for rate-limit-class failures that deserve a longer backoff
    fn is_rate_limited(&self) -> bool {
        false
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => {
                matches!(status, 403 | 408 | 429) || (500..600).contains(status)
            }
            // Challenge pages go straight to the fallback transport
            FetchError::Challenge { .. } => false,
            // Truncated or HTML payloads are treated as a failed attempt
            FetchError::Validation { .. } => true,
            FetchError::Render { .. } => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status: 403 | 429, .. })
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::Archive(_)
            | Error::Resource { .. }
            | Error::InvalidUrl(_)
            | Error::Cancelled
            | Error::Other(_) => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Fetch(e) if e.is_rate_limited())
    }
}

/// How a retry loop ended
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded
    Succeeded(T),
    /// Every allowed attempt failed with a retryable error
    Exhausted,
    /// An attempt failed with a non-retryable error; no further attempts were made
    NonRetryable,
    /// Cancellation was observed before the next attempt could start
    Cancelled,
}

/// Result of [`RetryPolicy::run`]: the outcome plus every failure seen, in attempt order
#[derive(Debug)]
pub struct RetryRun<T, E> {
    /// How the loop ended
    pub outcome: RetryOutcome<T>,
    /// Errors of the failed attempts, oldest first
    pub errors: Vec<E>,
}

impl<T, E> RetryRun<T, E> {
    /// Number of attempts that were actually started
    pub fn attempts(&self) -> u32 {
        let failed = self.errors.len() as u32;
        match self.outcome {
            RetryOutcome::Succeeded(_) => failed + 1,
            _ => failed,
        }
    }

    /// Error of the most recent failed attempt
    pub fn last_error(&self) -> Option<&E> {
        self.errors.last()
    }

    /// Whether the loop stopped because of cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, RetryOutcome::Cancelled)
    }
}

/// Bounded, cancellable retry loop with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total number of attempts allowed (always at least one)
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay to wait after the given (1-based) attempt failed, before jitter
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, multiplied by
    /// `rate_limit_multiplier` for rate-limited failures, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs =
            self.config.initial_delay.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        if rate_limited {
            secs *= self.config.rate_limit_multiplier;
        }
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs > max {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Run `operation` until it succeeds, fails terminally, exhausts the bound or is cancelled
    ///
    /// The operation receives the 1-based attempt number. Cancellation is checked before
    /// every attempt and raced against each backoff sleep; an attempt that is already in
    /// flight is allowed to finish.
    pub async fn run<F, Fut, T, E>(&self, cancel: &CancellationToken, mut operation: F) -> RetryRun<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: IsRetryable + std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut errors = Vec::new();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryRun {
                    outcome: RetryOutcome::Cancelled,
                    errors,
                };
            }
            attempt += 1;

            let e = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "operation succeeded after retry");
                    }
                    return RetryRun {
                        outcome: RetryOutcome::Succeeded(value),
                        errors,
                    };
                }
                Err(e) => e,
            };

            if !e.is_retryable() {
                tracing::debug!(error = %e, attempt, "operation failed with non-retryable error");
                errors.push(e);
                return RetryRun {
                    outcome: RetryOutcome::NonRetryable,
                    errors,
                };
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    error = %e,
                    attempts = attempt,
                    "operation failed after all retry attempts exhausted"
                );
                errors.push(e);
                return RetryRun {
                    outcome: RetryOutcome::Exhausted,
                    errors,
                };
            }

            let base = self.backoff(attempt, e.is_rate_limited());
            let delay = if self.config.jitter { add_jitter(base) } else { base };

            tracing::warn!(
                error = %e,
                attempt,
                max_attempts,
                rate_limited = e.is_rate_limited(),
                delay_ms = delay.as_millis() as u64,
                "operation failed, retrying"
            );
            errors.push(e);

            tokio::select! {
                _ = cancel.cancelled() => {
                    return RetryRun {
                        outcome: RetryOutcome::Cancelled,
                        errors,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the actual
/// delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
