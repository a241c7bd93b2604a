use serde::{Deserialize, Serialize};

use crate::types::WatchlistEntry;

/// Messages a page posts to the worker. The `type` tag matches what pages
/// put on the wire, so handling stays compatible across app versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// Promote a waiting update immediately.
    SkipWaiting,
    /// Run an episode check now, bypassing the spacing floor.
    CheckEpisodes,
    /// Persist the catalog credential for background use.
    StoreTmdbToken { token: String },
    /// Replace the worker's watchlist replica.
    SyncWatchlist {
        watchlist: Vec<WatchlistEntry>,
        #[serde(default)]
        updated_at: Option<i64>,
    },
    /// (Re-)register background scheduling.
    StartBackgroundChecks,
}

/// Messages the worker sends to attached pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Ask any page to re-send the watchlist.
    RequestWatchlist,
    /// Ask pages to re-send the catalog credential.
    RequestToken,
}
