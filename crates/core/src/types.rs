use serde::{Deserialize, Serialize};

/// Media kind carried by watchlist entries. Only TV entries are checked
/// for new episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the page-owned watchlist, replicated into the worker's
/// store. Unknown fields are preserved verbatim so the replica stays
/// faithful to whatever shape the page supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: i64,
    pub title: String,
    pub media_type: MediaKind,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Dedup key for an episode that has already aired:
/// `{series}_{season}_{episode}`.
pub fn aired_episode_key(series_id: i64, season: i32, episode: i32) -> String {
    format!("{series_id}_{season}_{episode}")
}

/// Dedup key for an episode airing today. The suffix keeps the key space
/// disjoint from [`aired_episode_key`] so both notifications for the same
/// episode can fire on its air day.
pub fn upcoming_episode_key(series_id: i64, season: i32, episode: i32) -> String {
    format!("{series_id}_{season}_{episode}_upcoming")
}

/// Notification tag derived from a dedup key. The platform collapses
/// notifications sharing a tag.
pub fn episode_tag(key: &str) -> String {
    format!("episode-{key}")
}
