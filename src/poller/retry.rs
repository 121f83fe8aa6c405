//! Exponential backoff for connection attempts.

use std::future::Future;
use std::time::Duration;

use crate::config::PollConfig;
use crate::constants::{CONNECT_RETRY_INITIAL_MS, MAX_RETRY_DELAY_SECS};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(CONNECT_RETRY_INITIAL_MS),
            max_delay: Duration::from_secs(MAX_RETRY_DELAY_SECS),
        }
    }
}

impl RetryConfig {
    #[cfg(test)]
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    pub fn from_poll(poll: &PollConfig) -> Self {
        Self {
            max_retries: poll.connect_retries,
            ..Self::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `retryable` rejects,
/// or `config.max_retries` retries are used up. Delays double up to
/// `config.max_delay`.
pub async fn with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts > config.max_retries || !retryable(&e) {
                    return Err(e);
                }

                tracing::warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempts,
                    config.max_retries + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
            }
        }
    }
}
