//! Bounded retry with fault classification.

use std::future::Future;
use std::time::Duration;

use freshet_core::{ClientError, ClientResult};
use tracing::warn;

/// Retries a fallible request a bounded number of times.
///
/// Classification is a predicate on the error value
/// ([`ClientError::is_retryable`]): non-retryable faults re-raise
/// immediately, everything else sleeps the configured interval and tries
/// again. Exhausting the budget is not a distinct error kind; the last
/// attempt's fault is logged and re-raised as-is.
#[derive(Debug, Clone, Copy)]
pub struct Retryer {
    max_retries: u32,
    interval: Duration,
}

impl Retryer {
    /// Creates a retryer allowing `max_retries` additional attempts after
    /// the first, sleeping `interval` between attempts.
    #[must_use]
    pub const fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }

    /// Runs `op` until it succeeds, fails non-retryably, or the budget is
    /// spent.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable fault or the final attempt's fault.
    pub async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries {
                        warn!(error = %err, "{what} failed, retries exhausted");
                        return Err(err);
                    }
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    warn!(error = %err, attempt, "{what} failed, will retry");
                    attempt += 1;
                    if !self.interval.is_zero() {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
    }
}
