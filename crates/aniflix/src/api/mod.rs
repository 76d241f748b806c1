//! Jikan API v4 access layer.
//!
//! A rate-limited, retrying client for the Jikan API (MyAnimeList
//! unofficial API) plus typed accessors for the catalog endpoints.

pub mod catalog;
pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod types;

pub use catalog::{Season, GENRES};
pub use client::JikanClient;
pub use error::{AdmissionTimeout, ApiError, TransportError};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use types::*;
