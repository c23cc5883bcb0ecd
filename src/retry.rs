use crate::error::Retryable;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }
}

/// The last error of a retried operation and how many attempts were spent.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is reached. Delays grow exponentially from `base_delay`.
pub async fn execute_with_retry<F, Fut, T, E>(
    operation: F,
    retry_config: &RetryConfig,
    operation_name: &str,
) -> Result<T, RetryFailure<E>>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = retry_config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        tracing::debug!(operation = operation_name, attempt, max_attempts, "🔄 attempt");

        let error = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        "✅ succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            tracing::warn!(
                operation = operation_name,
                attempt,
                error = %error,
                "❌ failed with a non-retryable error"
            );
            return Err(RetryFailure { attempts: attempt, error });
        }

        if attempt >= max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "❌ giving up after max attempts"
            );
            return Err(RetryFailure { attempts: attempt, error });
        }

        let delay = next_delay(attempt, retry_config, error.retry_after());
        tracing::warn!(
            operation = operation_name,
            attempt,
            error = %error,
            delay = ?delay,
            "⏳ transient failure, backing off"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Backoff before the attempt following `attempt`, honouring a server hint.
fn next_delay(attempt: u32, config: &RetryConfig, retry_after: Option<Duration>) -> Duration {
    let backoff = calculate_delay(attempt, config);
    match retry_after {
        Some(hint) => backoff.max(hint.min(config.max_delay)),
        None => backoff,
    }
}

/// Exponential backoff for `attempt` (1-based), capped at `max_delay`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let exponential_delay =
        config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);

    let delay_seconds = exponential_delay.min(config.max_delay.as_secs_f64());
    Duration::try_from_secs_f64(delay_seconds).unwrap_or(config.max_delay)
}
