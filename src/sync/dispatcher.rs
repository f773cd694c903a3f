//! Retrying push dispatcher
//!
//! Pushes dirty records upstream one attempt at a time. Each attempt races
//! the transport against a timer; transient failures back off exponentially
//! with jitter, permanent rejections stop the loop at once.

use std::time::Duration;

use rand::Rng;

use super::clock::Clock;
use super::transport::PushTransport;
use crate::error::{Result, SyncError};
use crate::records::PatientRecord;

/// Upper bound (exclusive) of the random delay added to each backoff
const MAX_JITTER_MS: u64 = 100;

/// Validated retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Validate raw retry parameters.
    ///
    /// `max_attempts` must be at least 1; delays must not be negative. An
    /// `attempt_timeout_ms` of 0 disables the per-attempt timer.
    pub fn new(max_attempts: i64, base_delay_ms: i64, attempt_timeout_ms: i64) -> Result<Self> {
        if max_attempts < 1 {
            return Err(SyncError::Configuration(format!(
                "max_attempts must be a positive integer, got {}",
                max_attempts
            )));
        }
        let max_attempts = u32::try_from(max_attempts).map_err(|_| {
            SyncError::Configuration(format!("max_attempts too large: {}", max_attempts))
        })?;

        if base_delay_ms < 0 {
            return Err(SyncError::Configuration(format!(
                "base_delay_ms must not be negative, got {}",
                base_delay_ms
            )));
        }
        if attempt_timeout_ms < 0 {
            return Err(SyncError::Configuration(format!(
                "attempt_timeout_ms must not be negative, got {}",
                attempt_timeout_ms
            )));
        }

        Ok(Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms as u64),
            attempt_timeout: (attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(attempt_timeout_ms as u64)),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Delay before the attempt following `attempt`, without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            attempt_timeout: Some(Duration::from_millis(15_000)),
        }
    }
}

/// Pushes record batches with timeout, backoff and error classification
pub struct SyncDispatcher<T: PushTransport, C: Clock> {
    transport: T,
    clock: C,
}

impl<T: PushTransport, C: Clock> SyncDispatcher<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self { transport, clock }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Validate the parameters, then push with retry.
    ///
    /// Invalid parameters fail with [`SyncError::Configuration`] before the
    /// transport is touched.
    pub async fn push_with_retry(
        &self,
        records: &[PatientRecord],
        max_attempts: i64,
        base_delay_ms: i64,
        attempt_timeout_ms: i64,
    ) -> Result<()> {
        let policy = RetryPolicy::new(max_attempts, base_delay_ms, attempt_timeout_ms)?;
        self.push(records, &policy).await
    }

    /// Push `records`, retrying transient failures under `policy`.
    ///
    /// Returns the last observed error unmodified once attempts run out, or
    /// the first non-retryable one.
    pub async fn push(&self, records: &[PatientRecord], policy: &RetryPolicy) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 1;
        loop {
            let err = match self.attempt(records, policy).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(attempt, records = records.len(), "Push succeeded after retry");
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::error!(
                    attempt,
                    records = records.len(),
                    error = %err,
                    "Push rejected, not retrying"
                );
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                records = records.len(),
                error = %err,
                "Push attempt failed"
            );

            if attempt >= policy.max_attempts {
                tracing::error!(
                    attempts = attempt,
                    records = records.len(),
                    error = %err,
                    "Push failed after all attempts"
                );
                return Err(err);
            }

            let delay = policy.backoff_delay(attempt) + jitter();
            tracing::debug!("Retrying push in {:?}", delay);
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    /// One push raced against the attempt timer. On timeout the push future
    /// is dropped; the remote write may still land.
    async fn attempt(&self, records: &[PatientRecord], policy: &RetryPolicy) -> Result<()> {
        let push = self.transport.sync_patients(records);

        match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, push).await {
                Ok(result) => result.map_err(SyncError::from_transport),
                Err(_) => Err(SyncError::AttemptTimeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => push.await.map_err(SyncError::from_transport),
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS))
}
