//! Shared retry policy for every upstream call.
//! Only errors with `AppError::is_transient()` are retried; everything else
//! is returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt_timeout: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay.max(settings.base_delay),
            attempt_timeout: settings.attempt_timeout,
            jitter: true,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is
    /// spent. Exhaustion turns the last transient cause into `Unavailable`.
    pub async fn run<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Transient(format!(
                    "{target} timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{target} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{target} attempt {attempt}/{} failed: {e}; retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(AppError::Unavailable {
                        target: target.to_string(),
                        attempts: attempt,
                        cause: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential delay before attempt `attempt + 1`, capped at `max_delay`.
    /// With jitter the delay is drawn from the upper half of that window.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let ceiling_ms = ceiling.as_millis() as u64;
        let floor_ms = ceiling_ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor_ms..=ceiling_ms))
    }
}

#[cfg(test)]
pub(crate) fn test_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(&RetrySettings {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        attempt_timeout: Duration::from_millis(200),
    })
}
