//! Exponential backoff for transient failures.
//!
//! Engines wrap their backend calls in [`retry_with_backoff`]; the policy
//! in effect comes from [`RetryPolicy::for_operation`] with optional
//! `CCORE_RETRY_<OP>_*` environment overrides. Retries live entirely
//! inside the engine attempt and never consume the router's fallback
//! budget.

use crate::error::{CcoreError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry policy: attempt count plus exponential delay bounds.
///
/// Delay doubles per attempt starting from `base_delay`, capped at
/// `max_delay`. Only errors where [`CcoreError::is_transient`] holds are
/// retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Built-in policy for an operation class, with environment overrides
    /// applied from `CCORE_RETRY_<OP>_MAX_ATTEMPTS`, `_BASE_DELAY` and
    /// `_MAX_DELAY` (delays in seconds, fractional allowed).
    ///
    /// Known operation classes: `youtube`, `url_api`, `url_network`,
    /// `audio`, `download`.
    pub fn for_operation(operation: &str) -> Self {
        let defaults = match operation {
            "youtube" => Self::new(5, Duration::from_secs(2), Duration::from_secs(60)),
            "url_api" => Self::new(3, Duration::from_secs(1), Duration::from_secs(30)),
            "url_network" => Self::new(3, Duration::from_millis(500), Duration::from_secs(10)),
            "audio" => Self::new(3, Duration::from_secs(2), Duration::from_secs(30)),
            "download" => Self::new(3, Duration::from_secs(1), Duration::from_secs(15)),
            _ => Self::default(),
        };
        defaults.with_env_overrides(operation)
    }

    fn with_env_overrides(mut self, operation: &str) -> Self {
        let prefix = format!("CCORE_RETRY_{}", operation.to_ascii_uppercase());

        if let Ok(raw) = std::env::var(format!("{prefix}_MAX_ATTEMPTS")) {
            match raw.parse::<u32>() {
                Ok(v) if (1..=20).contains(&v) => self.max_attempts = v,
                _ => tracing::warn!(
                    value = %raw,
                    "Invalid {}_MAX_ATTEMPTS, keeping {}",
                    prefix,
                    self.max_attempts
                ),
            }
        }
        if let Ok(raw) = std::env::var(format!("{prefix}_BASE_DELAY")) {
            match raw.parse::<f64>() {
                Ok(v) if v > 0.0 => self.base_delay = Duration::from_secs_f64(v),
                _ => tracing::warn!(value = %raw, "Invalid {}_BASE_DELAY, keeping default", prefix),
            }
        }
        if let Ok(raw) = std::env::var(format!("{prefix}_MAX_DELAY")) {
            match raw.parse::<f64>() {
                Ok(v) if v > 0.0 => self.max_delay = Duration::from_secs_f64(v),
                _ => tracing::warn!(value = %raw, "Invalid {}_MAX_DELAY, keeping default", prefix),
            }
        }
        self
    }

    /// Delay before retrying after `attempt` (0-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` up to `policy.max_attempts` times, sleeping with
/// exponential backoff between attempts. Non-transient errors abort
/// immediately. The backoff sleep is an ordinary await point, so dropping
/// the returned future cancels a pending sleep.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Giving up after retries: {err}"
                    );
                }
                return Err(err);
            }
        }
    }
}
