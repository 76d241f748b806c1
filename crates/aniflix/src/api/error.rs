//! Error types for the Jikan API access layer.

use std::time::Duration;
use thiserror::Error;

/// Failure of the underlying HTTP exchange (no response was obtained)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// The rate limiter gave up waiting for a free slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter admission timed out after {waited:?}")]
pub struct AdmissionTimeout {
    pub waited: Duration,
}

/// Errors returned by [`JikanClient`](super::JikanClient)
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    AdmissionTimeout(#[from] AdmissionTimeout),

    #[error("rate limited by upstream (HTTP 429)")]
    RateLimited,

    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("max retries reached after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<ApiError>,
    },

    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether another attempt may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::Network(_) | ApiError::Decode(_)
        )
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited => Some(429),
            ApiError::Http { status } => Some(*status),
            ApiError::RetriesExhausted { last_error, .. } => last_error.status(),
            _ => None,
        }
    }
}
