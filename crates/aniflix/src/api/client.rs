//! Jikan API client with rate limiting and retry logic.

use super::catalog::Season;
use super::error::ApiError;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{HttpTransport, ReqwestTransport};
use super::types::*;
use chrono::Datelike;
use reqwest::Url;
use serde::de::DeserializeOwned;
use shared::config::ApiConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Jikan API v4 client.
///
/// All methods take `&self`; share one client (or one [`RateLimiter`])
/// between tasks so they draw from the same admission window.
pub struct JikanClient {
    /// HTTP transport
    transport: Arc<dyn HttpTransport>,
    /// Base URL for Jikan API
    base_url: String,
    /// Rate limiter
    rate_limiter: Arc<RateLimiter>,
    /// Retry and backoff settings
    retry: RetryPolicy,
}

impl JikanClient {
    /// Create a new Jikan client backed by reqwest
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        request_timeout: Duration,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(user_agent, request_timeout)?;
        Ok(Self::with_transport(
            base_url,
            Arc::new(transport),
            rate_limiter,
            retry,
        ))
    }

    /// Create a client from the `[api]` config section
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(
            config.base_url.clone(),
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
            RetryPolicy::from_config(&config.retry),
        )
    }

    /// Create a client over an arbitrary transport
    pub fn with_transport(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            rate_limiter,
            retry,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Get current rate limit statistics: (admissions in window, ceiling)
    pub fn rate_limit_stats(&self) -> (usize, usize) {
        (
            self.rate_limiter.current_window_count(),
            self.rate_limiter.max_requests(),
        )
    }

    /// Build an endpoint URL from a path and query parameters
    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `url` through the rate limiter, retrying transient failures.
    ///
    /// Every attempt, including retries, goes through admission first. HTTP
    /// 429 and transport/parse failures are retried with linear backoff;
    /// any other non-2xx status fails immediately.
    pub async fn fetch_with_retry<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        match self.retry.request_deadline {
            Some(deadline) => timeout(deadline, self.retry_loop(url))
                .await
                .unwrap_or_else(|_| {
                    warn!(url = %url, deadline_ms = deadline.as_millis() as u64, "Request deadline exceeded");
                    Err(ApiError::DeadlineExceeded(deadline))
                }),
            None => self.retry_loop(url).await,
        }
    }

    async fn retry_loop<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        let mut attempt = 0;

        loop {
            let error = match self
                .rate_limiter
                .admit(|| self.send_once::<T>(url, attempt))
                .await
            {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };

            match self.retry.backoff(&error, attempt) {
                Some(delay) => {
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying after delay"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None if error.is_retryable() => {
                    warn!(url = %url, attempts = attempt + 1, error = %error, "Max retries reached");
                    return Err(ApiError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: Box::new(error),
                    });
                }
                None => return Err(error),
            }
        }
    }

    /// One network round trip, no retries
    async fn send_once<T: DeserializeOwned>(&self, url: &Url, attempt: u32) -> Result<T, ApiError> {
        debug!(url = %url, attempt = attempt + 1, "Making API request");

        let response = self.transport.get(url).await?;

        if response.status == 429 {
            return Err(ApiError::RateLimited);
        }
        if !response.is_success() {
            warn!(url = %url, status = response.status, "Request failed");
            return Err(ApiError::Http {
                status: response.status,
            });
        }

        let data = serde_json::from_slice(&response.body)?;
        debug!(url = %url, "Request successful");
        Ok(data)
    }

    /// Fetch top-ranked anime
    pub async fn get_top_anime(&self, page: u32, limit: u32) -> Result<AnimeListResponse, ApiError> {
        info!(page = page, limit = limit, "Fetching top anime");
        let url = self.endpoint(
            "/top/anime",
            &[("page", page.to_string()), ("limit", limit.to_string())],
        )?;
        self.fetch_with_retry(&url).await
    }

    /// Fetch seasonal anime; missing year/season default to today's
    pub async fn get_seasonal_anime(
        &self,
        year: Option<i32>,
        season: Option<Season>,
    ) -> Result<AnimeListResponse, ApiError> {
        let year = year.unwrap_or_else(|| chrono::Local::now().year());
        let season = season.unwrap_or_else(Season::current);
        info!(year = year, season = %season, "Fetching seasonal anime");
        let url = self.endpoint(&format!("/seasons/{}/{}", year, season), &[])?;
        self.fetch_with_retry(&url).await
    }

    /// Fetch full anime details by MAL ID
    pub async fn get_anime_by_id(&self, mal_id: u32) -> Result<SingleAnimeResponse, ApiError> {
        debug!(mal_id = mal_id, "Fetching anime details");
        let url = self.endpoint(&format!("/anime/{}", mal_id), &[])?;
        self.fetch_with_retry(&url).await
    }

    /// Fetch one page of an anime's episode list
    pub async fn get_anime_episodes(&self, mal_id: u32, page: u32) -> Result<EpisodesResponse, ApiError> {
        info!(mal_id = mal_id, page = page, "Fetching anime episodes");
        let url = self.endpoint(
            &format!("/anime/{}/episodes", mal_id),
            &[("page", page.to_string())],
        )?;
        self.fetch_with_retry(&url).await
    }

    /// Free-text search, best scored first
    pub async fn search_anime(&self, query: &str, page: u32, limit: u32) -> Result<AnimeListResponse, ApiError> {
        info!(query = query, page = page, "Searching anime");
        let url = self.endpoint(
            "/anime",
            &[
                ("q", query.to_string()),
                ("page", page.to_string()),
                ("limit", limit.to_string()),
                ("order_by", "score".to_string()),
                ("sort", "desc".to_string()),
            ],
        )?;
        self.fetch_with_retry(&url).await
    }

    /// Anime in a genre, best scored first
    pub async fn get_anime_by_genre(&self, genre_id: u32, page: u32) -> Result<AnimeListResponse, ApiError> {
        info!(genre_id = genre_id, page = page, "Fetching anime by genre");
        let url = self.endpoint(
            "/anime",
            &[
                ("genres", genre_id.to_string()),
                ("page", page.to_string()),
                ("order_by", "score".to_string()),
                ("sort", "desc".to_string()),
            ],
        )?;
        self.fetch_with_retry(&url).await
    }

    /// One random anime
    pub async fn get_random_anime(&self) -> Result<SingleAnimeResponse, ApiError> {
        info!("Fetching random anime");
        let url = self.endpoint("/random/anime", &[])?;
        self.fetch_with_retry(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::HttpResponse;
    use crate::api::types::fixtures::{anime_json, anime_list_json};
    use crate::api::TransportError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const BASE_URL: &str = "https://api.jikan.moe/v4";

    type Reply = Result<HttpResponse, TransportError>;

    /// Transport that replays canned replies and records each call
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
        }

        /// Call times relative to `start`
        fn offsets(&self, start: Instant) -> Vec<Duration> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, at)| at.duration_since(start))
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
            self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn ok(body: Value) -> Reply {
        Ok(HttpResponse {
            status: 200,
            body: serde_json::to_vec(&body).unwrap(),
        })
    }

    fn status(code: u16) -> Reply {
        Ok(HttpResponse {
            status: code,
            body: br#"{"status":0,"message":"error"}"#.to_vec(),
        })
    }

    fn connection_reset() -> Reply {
        Err(TransportError::Other("connection reset".into()))
    }

    fn client_with(transport: Arc<ScriptedTransport>, limiter: RateLimiter, retry: RetryPolicy) -> JikanClient {
        JikanClient::with_transport(BASE_URL, transport, Arc::new(limiter), retry)
    }

    fn client(transport: Arc<ScriptedTransport>) -> JikanClient {
        client_with(
            transport,
            RateLimiter::new(3, Duration::from_millis(1000)),
            RetryPolicy::default(),
        )
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = JikanClient::from_config(&ApiConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().rate_limit_stats(), (0, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let transport = ScriptedTransport::new(vec![status(429), status(429), ok(anime_list_json(&[1]))]);
        let client = client(transport.clone());
        let start = Instant::now();

        let response = client.get_top_anime(1, 20).await.unwrap();

        assert_eq!(response.data[0].mal_id, 1);
        assert_eq!(start.elapsed(), ms(6000));
        assert_eq!(transport.offsets(start), vec![ms(0), ms(2000), ms(6000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![status(500), ok(anime_list_json(&[1]))]);
        let client = client(transport.clone());

        let err = client.get_top_anime(1, 25).await.unwrap_err();

        assert!(matches!(err, ApiError::Http { status: 500 }));
        assert_eq!(transport.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_backs_off_linearly() {
        let transport = ScriptedTransport::new(vec![
            connection_reset(),
            connection_reset(),
            ok(json!({ "data": anime_json(21, "One Piece") })),
        ]);
        let client = client(transport.clone());
        let start = Instant::now();

        let response = client.get_anime_by_id(21).await.unwrap();

        assert_eq!(response.data.title, "One Piece");
        assert_eq!(transport.offsets(start), vec![ms(0), ms(1000), ms(3000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let transport = ScriptedTransport::new(vec![
            connection_reset(),
            connection_reset(),
            connection_reset(),
            ok(anime_list_json(&[1])),
        ]);
        let client = client(transport.clone());

        let err = client.get_top_anime(1, 25).await.unwrap_err();

        match err {
            ApiError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, ApiError::Network(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.urls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_on_every_attempt() {
        let transport = ScriptedTransport::new(vec![status(429), status(429), status(429)]);
        let client = client(transport.clone());

        let err = client.get_random_anime().await.unwrap_err();

        assert_eq!(err.status(), Some(429));
        assert!(matches!(err, ApiError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(transport.urls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_retried() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse {
                status: 200,
                body: b"<html>upstream hiccup</html>".to_vec(),
            }),
            ok(anime_list_json(&[7])),
        ]);
        let client = client(transport.clone());
        let start = Instant::now();

        let response = client.search_anime("bebop", 1, 25).await.unwrap();

        assert_eq!(response.data[0].mal_id, 7);
        assert_eq!(transport.offsets(start), vec![ms(0), ms(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_returned_unmodified() {
        let body = json!({
            "data": { "mal_id": 1, "nested": { "list": [1, 2.5, null, "x"] } },
            "extra": true
        });
        let transport = ScriptedTransport::new(vec![ok(body.clone())]);
        let client = client(transport);

        let url = Url::parse("https://api.jikan.moe/v4/anime/1").unwrap();
        let value: Value = client.fetch_with_retry(&url).await.unwrap();

        assert_eq!(value, body);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reenters_admission() {
        let transport = ScriptedTransport::new(vec![status(429), ok(anime_list_json(&[1]))]);
        let client = client_with(
            transport.clone(),
            RateLimiter::new(1, ms(10_000)),
            RetryPolicy::default(),
        );
        let start = Instant::now();

        client.get_top_anime(1, 25).await.unwrap();

        // Backoff ends at 2s but the window only frees its slot at 10s
        assert_eq!(transport.offsets(start), vec![ms(0), ms(10_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout_is_terminal() {
        let transport = ScriptedTransport::new(vec![status(429), ok(anime_list_json(&[1]))]);
        let client = client_with(
            transport.clone(),
            RateLimiter::new(1, ms(10_000)).with_admission_timeout(ms(1000)),
            RetryPolicy::default(),
        );

        let err = client.get_top_anime(1, 25).await.unwrap_err();

        assert!(matches!(err, ApiError::AdmissionTimeout(_)));
        assert_eq!(transport.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_backoff() {
        let transport = ScriptedTransport::new(vec![status(429), ok(anime_list_json(&[1]))]);
        let client = client_with(
            transport.clone(),
            RateLimiter::new(3, ms(1000)),
            RetryPolicy {
                request_deadline: Some(ms(1500)),
                ..Default::default()
            },
        );

        let err = client.get_top_anime(1, 25).await.unwrap_err();

        assert!(matches!(err, ApiError::DeadlineExceeded(d) if d == ms(1500)));
        assert_eq!(transport.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_window() {
        let replies = (0..5).map(|i| ok(json!({ "data": anime_json(i, "x") }))).collect();
        let transport = ScriptedTransport::new(replies);
        let client = Arc::new(client(transport.clone()));
        let start = Instant::now();

        let mut handles = Vec::new();
        for id in 0..5 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move { client.get_anime_by_id(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut offsets = transport.offsets(start);
        offsets.sort();
        assert_eq!(offsets, vec![ms(0), ms(0), ms(0), ms(1000), ms(1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessor_urls() {
        let single = || ok(json!({ "data": anime_json(1, "x") }));
        let list = || ok(anime_list_json(&[1]));
        let episodes = || {
            ok(json!({
                "data": [],
                "pagination": { "last_visible_page": 1, "has_next_page": false }
            }))
        };
        let transport = ScriptedTransport::new(vec![
            list(),
            list(),
            single(),
            episodes(),
            list(),
            list(),
            single(),
        ]);
        let client = client(transport.clone());

        client.get_top_anime(1, 20).await.unwrap();
        client.get_seasonal_anime(Some(2024), Some(Season::Fall)).await.unwrap();
        client.get_anime_by_id(5114).await.unwrap();
        client.get_anime_episodes(5114, 2).await.unwrap();
        client.search_anime("cowboy bebop", 1, 25).await.unwrap();
        client.get_anime_by_genre(22, 3).await.unwrap();
        client.get_random_anime().await.unwrap();

        assert_eq!(
            transport.urls(),
            vec![
                "https://api.jikan.moe/v4/top/anime?page=1&limit=20",
                "https://api.jikan.moe/v4/seasons/2024/fall",
                "https://api.jikan.moe/v4/anime/5114",
                "https://api.jikan.moe/v4/anime/5114/episodes?page=2",
                "https://api.jikan.moe/v4/anime?q=cowboy+bebop&page=1&limit=25&order_by=score&sort=desc",
                "https://api.jikan.moe/v4/anime?genres=22&page=3&order_by=score&sort=desc",
                "https://api.jikan.moe/v4/random/anime",
            ]
        );
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let transport = ScriptedTransport::new(Vec::new());
        let client = JikanClient::with_transport(
            "https://api.jikan.moe/v4/",
            transport,
            Arc::new(RateLimiter::new(3, ms(1000))),
            RetryPolicy::default(),
        );
        let url = client.endpoint("/anime/1", &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.jikan.moe/v4/anime/1");
    }
}
