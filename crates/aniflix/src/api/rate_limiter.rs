//! Sliding-window rate limiter.
//!
//! Allows at most `max_requests` admissions inside any trailing window of
//! length `window`. Callers over the ceiling are delayed, never rejected
//! (unless an admission timeout is configured).

use super::error::AdmissionTimeout;
use shared::config::RateLimitConfig;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Rate limiter over a sliding window of admission timestamps
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum admissions per window
    max_requests: usize,
    /// Window length
    window: Duration,
    /// Give up after waiting this long for a slot
    admission_timeout: Option<Duration>,
    /// Admission timestamps inside the current window, oldest first
    recent_requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a rate limiter admitting `max_requests` per `window`
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            admission_timeout: None,
            recent_requests: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Fail admissions that would have to wait longer than `timeout`
    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = Some(timeout);
        self
    }

    /// Build a rate limiter from the `[api.rate_limit]` config section
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiter = Self::new(config.max_requests, Duration::from_millis(config.window_ms));
        match config.admission_timeout_ms {
            Some(ms) => limiter.with_admission_timeout(Duration::from_millis(ms)),
            None => limiter,
        }
    }

    /// Wait until a request may be made, then record it
    pub async fn acquire(&self) -> Result<(), AdmissionTimeout> {
        let started = Instant::now();

        loop {
            let Some(wait) = self.try_acquire() else {
                return Ok(());
            };

            if let Some(timeout) = self.admission_timeout {
                let waited = started.elapsed();
                if waited + wait > timeout {
                    warn!(
                        waited_ms = waited.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "Rate limit: admission timed out"
                    );
                    return Err(AdmissionTimeout { waited });
                }
            }

            debug!(
                wait_ms = wait.as_millis() as u64,
                "Rate limit: waiting for a free slot"
            );
            sleep(wait).await;
        }
    }

    /// Run `task` once admitted.
    ///
    /// The task's own result, success or failure, is returned untouched.
    pub async fn admit<F, Fut, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionTimeout>,
    {
        self.acquire().await?;
        task().await
    }

    /// Record an admission if a slot is free, otherwise return how long
    /// until the oldest admission leaves the window.
    fn try_acquire(&self) -> Option<Duration> {
        let mut recent = self.lock();
        let now = Instant::now();
        self.prune(&mut recent, now);

        if recent.len() < self.max_requests {
            recent.push_back(now);
            return None;
        }

        let oldest = *recent.front()?;
        Some(self.window - now.duration_since(oldest))
    }

    fn prune(&self, recent: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = recent.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            recent.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        // The queue holds plain timestamps, so a poisoned lock is still usable
        self.recent_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of admissions inside the current window
    pub fn current_window_count(&self) -> usize {
        let mut recent = self.lock();
        self.prune(&mut recent, Instant::now());
        recent.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_five_waits_for_window() {
        let limiter = Arc::new(RateLimiter::new(3, WINDOW));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap().duration_since(start));
        }
        admitted.sort();

        assert_eq!(&admitted[..3], &[Duration::ZERO; 3]);
        assert!(admitted[3] >= WINDOW && admitted[3] < WINDOW + Duration::from_millis(50));
        assert!(admitted[4] >= WINDOW && admitted[4] < WINDOW + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_holds_in_every_window() {
        let limiter = RateLimiter::new(3, WINDOW);
        let start = Instant::now();

        let mut admitted = Vec::new();
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
            admitted.push(Instant::now().duration_since(start));
        }

        // Any 4 consecutive admissions must span at least one full window
        for pair in admitted.windows(4) {
            assert!(pair[3] - pair[0] >= WINDOW, "admissions too dense: {:?}", pair);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(2, WINDOW);

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert_eq!(limiter.current_window_count(), 2);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.current_window_count(), 2);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(limiter.current_window_count(), 0);

        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_returns_task_result() {
        let limiter = RateLimiter::new(3, WINDOW);

        let value: Result<u32, ApiError> = limiter.admit(|| async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);

        let failure: Result<u32, ApiError> = limiter
            .admit(|| async { Err(ApiError::Http { status: 503 }) })
            .await;
        assert!(matches!(failure, Err(ApiError::Http { status: 503 })));
        assert_eq!(limiter.current_window_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout() {
        let limiter = RateLimiter::new(1, WINDOW).with_admission_timeout(Duration::from_millis(500));

        limiter.acquire().await.unwrap();
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.waited, Duration::ZERO);

        // A timeout longer than the remaining wait still admits
        let patient = RateLimiter::new(1, WINDOW).with_admission_timeout(Duration::from_millis(1500));
        patient.acquire().await.unwrap();
        patient.acquire().await.unwrap();
    }

    #[test]
    fn test_from_config() {
        let config = RateLimitConfig {
            max_requests: 0,
            window_ms: 250,
            admission_timeout_ms: Some(100),
        };
        let limiter = RateLimiter::from_config(&config);
        assert_eq!(limiter.max_requests(), 1);
        assert_eq!(limiter.window(), Duration::from_millis(250));
        assert_eq!(limiter.admission_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_current_window_count() {
        let limiter = RateLimiter::new(3, WINDOW);
        assert_eq!(limiter.current_window_count(), 0);
    }
}
