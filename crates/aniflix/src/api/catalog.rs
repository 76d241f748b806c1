//! Broadcast seasons and the curated genre list.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Anime broadcast season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }

    /// Season a calendar month (1-12) falls in
    pub fn for_month(month: u32) -> Self {
        match month {
            1..=3 => Season::Winter,
            4..=6 => Season::Spring,
            7..=9 => Season::Summer,
            _ => Season::Fall,
        }
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self::for_month(date.month())
    }

    /// Season of the local current date
    pub fn current() -> Self {
        Self::for_date(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" | "autumn" => Ok(Season::Fall),
            other => Err(format!("unknown season: {}", other)),
        }
    }
}

/// Genres offered for browsing, keyed by MAL genre id
pub const GENRES: &[(u32, &str)] = &[
    (1, "Action"),
    (2, "Adventure"),
    (4, "Comedy"),
    (8, "Drama"),
    (10, "Fantasy"),
    (14, "Horror"),
    (18, "Mecha"),
    (19, "Music"),
    (22, "Romance"),
    (24, "Sci-Fi"),
    (30, "Sports"),
    (36, "Slice of Life"),
    (40, "Psychological"),
    (41, "Thriller"),
];

/// Name of a curated genre
pub fn genre_name(id: u32) -> Option<&'static str> {
    GENRES.iter().find(|(gid, _)| *gid == id).map(|(_, name)| *name)
}

/// Resolve a genre by numeric id or case-insensitive name
pub fn resolve_genre(input: &str) -> Option<u32> {
    let input = input.trim();
    if let Ok(id) = input.parse::<u32>() {
        return Some(id);
    }
    GENRES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(input))
        .map(|(id, _)| *id)
}
