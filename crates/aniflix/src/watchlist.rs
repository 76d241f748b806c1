//! Locally persisted watch state.
//!
//! Each list is a JSON array stored under a fixed key in the key-value
//! table, newest entry first. A value that no longer parses reads as an
//! empty list.

use crate::api::AnimeData;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::config::StoreConfig;
use shared::Database;
use tracing::{debug, warn};

pub const CONTINUE_WATCHING_KEY: &str = "aniflix_continue_watching";
pub const MY_LIST_KEY: &str = "aniflix_my_list";
pub const RECENTLY_VIEWED_KEY: &str = "aniflix_recently_viewed";
pub const SEARCH_HISTORY_KEY: &str = "aniflix_search_history";

/// An anime the user has started watching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedAnime {
    #[serde(flatten)]
    pub anime: AnimeData,
    pub watched_at: DateTime<Utc>,
    /// Percentage, 0-100
    pub progress: u8,
    pub current_episode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_episode_watched: Option<String>,
}

/// An anime saved to "my list"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteAnime {
    #[serde(flatten)]
    pub anime: AnimeData,
    pub added_at: DateTime<Utc>,
}

/// Watch-state store over the key-value database
pub struct WatchStore {
    db: Database,
    limits: StoreConfig,
}

impl WatchStore {
    pub fn new(db: Database, limits: StoreConfig) -> Self {
        Self { db, limits }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let Some(raw) = self.db.get(key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(key = key, error = %e, "Stored list is unreadable, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        let raw = serde_json::to_string(items)
            .with_context(|| format!("Failed to serialize {}", key))?;
        self.db.set(key, &raw)?;
        debug!(key = key, entries = items.len(), "Stored list");
        Ok(())
    }

    /// Drop entries for `mal_id`; returns whether anything was removed
    fn remove_by_id<T, F>(&self, key: &str, mal_id: u32, id_of: F) -> Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> u32,
    {
        let mut items: Vec<T> = self.load(key)?;
        let before = items.len();
        items.retain(|item| id_of(item) != mal_id);
        if items.len() == before {
            return Ok(false);
        }
        self.store(key, &items)?;
        Ok(true)
    }

    // ========== Continue watching ==========

    /// Move `anime` to the front of the continue-watching list
    pub fn add_to_continue_watching(&self, anime: &AnimeData, current_episode: u32, progress: u8) -> Result<()> {
        let mut items: Vec<WatchedAnime> = self.load(CONTINUE_WATCHING_KEY)?;
        items.retain(|item| item.anime.mal_id != anime.mal_id);
        items.insert(
            0,
            WatchedAnime {
                anime: anime.clone(),
                watched_at: Utc::now(),
                progress: progress.min(100),
                current_episode,
                last_episode_watched: None,
            },
        );
        items.truncate(self.limits.continue_watching_cap);
        self.store(CONTINUE_WATCHING_KEY, &items)
    }

    pub fn get_continue_watching(&self) -> Result<Vec<WatchedAnime>> {
        self.load(CONTINUE_WATCHING_KEY)
    }

    pub fn remove_from_continue_watching(&self, mal_id: u32) -> Result<bool> {
        self.remove_by_id(CONTINUE_WATCHING_KEY, mal_id, |item: &WatchedAnime| item.anime.mal_id)
    }

    // ========== My list ==========

    /// Add `anime` to my list; returns false if it was already there
    pub fn add_to_my_list(&self, anime: &AnimeData) -> Result<bool> {
        let mut items: Vec<FavoriteAnime> = self.load(MY_LIST_KEY)?;
        if items.iter().any(|item| item.anime.mal_id == anime.mal_id) {
            return Ok(false);
        }
        items.insert(
            0,
            FavoriteAnime {
                anime: anime.clone(),
                added_at: Utc::now(),
            },
        );
        self.store(MY_LIST_KEY, &items)?;
        Ok(true)
    }

    pub fn remove_from_my_list(&self, mal_id: u32) -> Result<bool> {
        self.remove_by_id(MY_LIST_KEY, mal_id, |item: &FavoriteAnime| item.anime.mal_id)
    }

    pub fn get_my_list(&self) -> Result<Vec<FavoriteAnime>> {
        self.load(MY_LIST_KEY)
    }

    pub fn is_in_my_list(&self, mal_id: u32) -> Result<bool> {
        Ok(self
            .get_my_list()?
            .iter()
            .any(|item| item.anime.mal_id == mal_id))
    }

    // ========== Recently viewed ==========

    pub fn add_to_recently_viewed(&self, anime: &AnimeData) -> Result<()> {
        let mut items: Vec<AnimeData> = self.load(RECENTLY_VIEWED_KEY)?;
        items.retain(|item| item.mal_id != anime.mal_id);
        items.insert(0, anime.clone());
        items.truncate(self.limits.recently_viewed_cap);
        self.store(RECENTLY_VIEWED_KEY, &items)
    }

    pub fn get_recently_viewed(&self) -> Result<Vec<AnimeData>> {
        self.load(RECENTLY_VIEWED_KEY)
    }

    // ========== Search history ==========

    /// Record a search query; blank queries are ignored
    pub fn add_to_search_history(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Ok(());
        }
        let lowered = query.to_lowercase();
        let mut items: Vec<String> = self.load(SEARCH_HISTORY_KEY)?;
        items.retain(|item| item.to_lowercase() != lowered);
        items.insert(0, query.to_string());
        items.truncate(self.limits.search_history_cap);
        self.store(SEARCH_HISTORY_KEY, &items)
    }

    pub fn get_search_history(&self) -> Result<Vec<String>> {
        self.load(SEARCH_HISTORY_KEY)
    }

    pub fn clear_search_history(&self) -> Result<()> {
        self.db.remove(SEARCH_HISTORY_KEY)?;
        Ok(())
    }

    /// Remove every list
    pub fn clear_all(&self) -> Result<()> {
        for key in [
            CONTINUE_WATCHING_KEY,
            MY_LIST_KEY,
            RECENTLY_VIEWED_KEY,
            SEARCH_HISTORY_KEY,
        ] {
            self.db.remove(key)?;
        }
        Ok(())
    }
}
