//! Bounded retry with exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::providers::BackendError;

/// Delay schedule: `initial * multiplier^n`, capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_backoff.min(config.max_backoff),
            max: config.max_backoff,
            multiplier: config.multiplier.max(1.0),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let scaled = current.as_secs_f64() * self.multiplier;
        self.next = if scaled.is_finite() && scaled < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max
        };
        Some(current)
    }
}

/// Run `call` with a per-attempt deadline, retrying transient failures.
///
/// At most `max_retries + 1` attempts are made. Deadline expiry counts as
/// [`BackendError::Timeout`]. Non-transient errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    deadline: Duration,
    operation: &str,
    mut call: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut delays = Backoff::new(config);
    let mut attempt: u32 = 0;

    loop {
        let outcome = match tokio::time::timeout(deadline, call()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(deadline)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = delays.next().unwrap_or(config.max_backoff);
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = config.max_retries,
                    delay = ?delay,
                    error = %e,
                    "Transient backend failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
