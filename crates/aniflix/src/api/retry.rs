//! Retry policy for API requests.
//!
//! Backoff is linear in the attempt index: after failed attempt `k`
//! (zero-based) the client sleeps `base * (k + 1)`. Upstream rate limiting
//! (HTTP 429) uses its own, longer base.

use super::error::ApiError;
use shared::config::RetryConfig;
use std::time::Duration;

/// Maximum delay used when a computation would overflow
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// How many times to try a request and how long to wait between tries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for one logical request
    pub max_retries: u32,
    /// Backoff base after transport failures and malformed bodies
    pub retry_delay: Duration,
    /// Backoff base after HTTP 429
    pub rate_limited_delay: Duration,
    /// Upper bound on the whole logical request, including waits
    pub request_deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            rate_limited_delay: Duration::from_millis(2000),
            request_deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            rate_limited_delay: Duration::from_millis(config.rate_limited_delay_ms),
            request_deadline: config.request_deadline_ms.map(Duration::from_millis),
        }
    }

    /// Attempts actually made; a request is always tried at least once
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay before retrying after `error` on zero-based `attempt`.
    ///
    /// Returns `None` when the error must not be retried or no attempts remain.
    pub fn backoff(&self, error: &ApiError, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.attempts() {
            return None;
        }
        let base = match error {
            ApiError::RateLimited => self.rate_limited_delay,
            e if e.is_retryable() => self.retry_delay,
            _ => return None,
        };
        Some(base.checked_mul(attempt + 1).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF))
    }
}
