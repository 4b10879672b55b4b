//! Bounded exponential backoff for connection opens.
//!
//! The helper knows nothing about PostgreSQL. Callers pass a classifier
//! for failures worth another attempt; [`RetryPolicy`] decides how long to
//! wait. Only connection opens go through it. Queries on an open
//! connection are never retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ReplicationConfig;

/// Marker returned when the cancellation token fires between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles for every retry after that.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Build the policy from the replication settings.
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(
            config.max_retry_attempts,
            Duration::from_millis(config.initial_retry_delay_ms),
        )
    }

    /// Delay before retry `k` (1-based): `initial_delay * 2^(k-1)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }

    /// The full list of waits between attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|k| self.delay_for_retry(k))
            .collect()
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_transient: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display + From<Cancelled>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_transient(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for_retry(attempt);
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {}ms",
            attempt,
            max_attempts,
            err,
            delay.as_millis()
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
