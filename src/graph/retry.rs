//! Retry with backoff for Graph API calls
//!
//! Throttled calls are retried a bounded number of times. A numeric
//! `Retry-After` from the server is honoured exactly; otherwise the wait
//! doubles on every retry. The wait carries over between the two strategies:
//! after a `Retry-After` of N seconds the next exponential wait is 2N.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// First exponential backoff
    pub initial_backoff: Duration,

    /// Optional cap for exponential backoff
    ///
    /// Unset by default so the wait keeps compounding after a server-provided
    /// `Retry-After`. Server-provided waits are never capped.
    pub max_backoff: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: None,
        }
    }
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation after the current backoff
    Retry,
    /// Retry after a specific duration (e.g., from Retry-After header)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

/// Wait state carried across the retries of one operation
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    floor: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            current: config.initial_backoff,
            floor: config.initial_backoff,
            max: config.max_backoff,
        }
    }

    /// How long to wait before the next attempt
    ///
    /// The following exponential wait is twice this one, but never below the
    /// initial backoff, so a `Retry-After: 0` does not turn later retries
    /// into a tight loop.
    pub fn next_wait(&mut self, decision: RetryDecision) -> Duration {
        let wait = match decision {
            RetryDecision::RetryAfter(wait) => wait,
            RetryDecision::Retry | RetryDecision::NoRetry => match self.max {
                Some(max) => self.current.min(max),
                None => self.current,
            },
        };
        self.current = wait.saturating_mul(2).max(self.floor);
        wait
    }
}

/// Execute an async operation with retry logic
///
/// `operation` receives the zero-based attempt number. Returns the first
/// success, the first non-retryable error, or the error of the last attempt
/// once `max_retries` retries have been spent.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let decision = e.retry_decision();

                if decision == RetryDecision::NoRetry {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation failed with non-retryable error: {}",
                        e
                    );
                    return Err(e);
                }

                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation failed after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let wait = backoff.next_wait(decision);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    wait_ms = wait.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );

                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
