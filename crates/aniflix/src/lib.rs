//! aniflix: anime catalog browsing over the Jikan API.
//!
//! This library provides a rate-limited, retrying Jikan client and a local
//! store for watch state (continue watching, my list, history).

pub mod api;
pub mod watchlist;

pub use api::{ApiError, JikanClient, RateLimiter, RetryPolicy};
pub use watchlist::{FavoriteAnime, WatchStore, WatchedAnime};
