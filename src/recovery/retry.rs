//! Attempt budget and backoff for outbound calls.

use crate::error::{ManglerError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to a quarter of the delay at random
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Budget for Sheets, PostgREST and chat calls.
    pub fn network(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.5,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

pub trait RetryPolicy: Send + Sync {
    /// `attempt` is 1-based and counts the call that just failed.
    fn should_retry(&self, attempt: u32, error: &ManglerError) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, error: &ManglerError) -> bool {
        attempt < self.config.max_attempts && error.is_transient()
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self
            .config
            .initial_delay
            .mul_f64(factor)
            .min(self.config.max_delay);

        if self.config.jitter {
            delay + delay.mul_f64(rand::thread_rng().gen_range(0.0..0.25))
        } else {
            delay
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or the policy's
/// budget is spent. The last error is returned unchanged.
pub async fn retry_async_with_policy<T, F, Fut>(
    operation: F,
    policy: &dyn RetryPolicy,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if policy.should_retry(attempt, &err) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
