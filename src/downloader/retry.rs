//! Retry policy with cubic backoff
//!
//! Attempt `k` that fails retryably is followed by a `k³` second sleep, up to
//! `max_attempts` attempts. Fatal failures stop immediately. Sleeps end early
//! when the run is cancelled.

use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use super::config::{calculate_backoff, MAX_ATTEMPTS};
use crate::cancel::RunCancellation;
use crate::fetcher::{FailureClass, RetryContext, RetryErrorType, TransferError};
use crate::metrics;

/// Backoff schedule: delay after failed attempt `k` (1-based)
pub type BackoffFn = fn(u32) -> Duration;

/// Bounded retry with a deterministic backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffFn,
}

/// What [`RetryPolicy::run`] observed
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Result of the last attempt
    pub result: Result<T, TransferError>,
    /// Attempts made
    pub attempts: u32,
    /// Total time spent sleeping between attempts
    pub total_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` attempts (at least one) and cubic backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: calculate_backoff,
        }
    }

    /// Replace the backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = backoff;
        self
    }

    /// Policy that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts).with_backoff(|_| Duration::ZERO)
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay that follows failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    /// Drive `attempt_fn` until it succeeds, fails fatally, runs out of
    /// attempts or the run is cancelled.
    ///
    /// `attempt_fn` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        filename: &str,
        cancel: &RunCancellation,
        mut attempt_fn: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let mut total_backoff = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let err = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        let ctx = RetryContext::new(
                            attempt,
                            self.max_attempts,
                            RetryErrorType::NetworkGeneric,
                            Duration::ZERO,
                            filename,
                            "",
                        );
                        info!("{}", ctx.format_success());
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        total_backoff,
                    };
                }
                Err(err) => err,
            };

            let delay = self.delay_after(attempt);
            let ctx = RetryContext::new(
                attempt,
                self.max_attempts,
                err.kind(),
                delay,
                filename,
                err.to_string(),
            );

            match err.class() {
                FailureClass::Cancelled => {}
                FailureClass::Fatal => error!("{}", ctx.format_failure()),
                FailureClass::Retryable if attempt >= self.max_attempts => {
                    error!("{}", ctx.format_failure())
                }
                FailureClass::Retryable => {
                    warn!(
                        filename = %filename,
                        attempt = attempt,
                        error = %err,
                        "{}",
                        ctx.format_retry()
                    );
                    metrics::record_retry_backoff(delay, attempt, err.kind());

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return RetryOutcome {
                                result: Err(TransferError::Cancelled),
                                attempts: attempt,
                                total_backoff,
                            };
                        }
                    }
                    total_backoff += delay;
                    attempt += 1;
                    continue;
                }
            }

            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
                total_backoff,
            };
        }
    }
}
