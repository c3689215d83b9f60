//! Retry policy and the attempt loop shared by every channel
//!
//! Transient transport failures are retried with capped exponential backoff.
//! Terminal failures return after a single attempt. Cancellation is observed
//! before each attempt, while an attempt is in flight, and during backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::traits::{ChannelError, DeliveryError, DeliveryReceipt};

/// Upper bound on a server-requested wait (Telegram `retry_after`)
const MAX_SERVER_DELAY: Duration = Duration::from_secs(60);

// ============================================================================
// RetryPolicy
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 1s then 2s (4s cap)
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Backoff after the `failed_attempt`-th failure (1-based)
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Backoff honoring a server-requested delay when it is longer
    pub fn backoff(&self, failed_attempt: u32, server_delay: Option<Duration>) -> Duration {
        let computed = self.delay_for_attempt(failed_attempt);
        match server_delay {
            Some(requested) => computed.max(requested.min(MAX_SERVER_DELAY)),
            None => computed,
        }
    }
}

// ============================================================================
// deliver_with_retry
// ============================================================================

/// Run `attempt` until it succeeds, fails terminally, runs out of attempts,
/// or `cancel` fires. The closure receives the 1-based attempt number.
pub async fn deliver_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    provider_id: &str,
    mut attempt: F,
) -> Result<DeliveryReceipt, DeliveryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), ChannelError>>,
{
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled { attempts });
        }
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled { attempts }),
            result = attempt(attempts) => result,
        };

        let err = match outcome {
            Ok(()) => {
                if attempts > 1 {
                    tracing::info!(provider_id, attempts, "Delivery succeeded after retry");
                }
                return Ok(DeliveryReceipt { attempts });
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            tracing::warn!(provider_id, attempts, error = %err, "Delivery failed with non-retryable error");
            return Err(DeliveryError::Rejected { attempts, source: err });
        }

        if attempts >= policy.max_attempts {
            tracing::warn!(
                provider_id,
                attempts,
                error = %err,
                "Delivery failed, retries exhausted"
            );
            return Err(DeliveryError::RetriesExhausted { attempts, source: err });
        }

        let delay = policy.backoff(attempts, err.retry_after());
        tracing::warn!(
            provider_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Delivery attempt failed, retrying after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled { attempts }),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
