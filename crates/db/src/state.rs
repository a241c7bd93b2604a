//! Typed worker state on top of the raw kv repo.
//!
//! Values live as JSON text under fixed keys. Reads that hit corrupt or
//! missing data degrade to safe defaults through the `*_or_default`
//! accessors so a wedged store can never permanently disable checks;
//! writes always propagate their errors.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::warn;

use reelwatch_core::types::WatchlistEntry;

use crate::repo::kv;
use crate::DbError;

pub const KEY_TMDB_TOKEN: &str = "tmdb_token";
pub const KEY_WATCHLIST: &str = "watchlist";
pub const KEY_WATCHLIST_UPDATED: &str = "watchlist_updated";
pub const KEY_LAST_CHECKED_EPISODES: &str = "last_checked_episodes";
pub const KEY_LAST_CHECK_TIME: &str = "last_check_time";

/// Episode dedup map: composite episode key to epoch millis of the
/// notification that consumed it.
pub type EpisodeCheckState = HashMap<String, i64>;

/// Shared handle to the worker's persistent state.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stored catalog credential. Blank values count as absent.
    pub async fn credential(&self) -> Result<Option<String>, DbError> {
        let raw = kv::get(&self.pool, KEY_TMDB_TOKEN).await?;
        Ok(raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
    }

    pub async fn set_credential(&self, token: &str) -> Result<(), DbError> {
        kv::put(&self.pool, KEY_TMDB_TOKEN, token.trim()).await?;
        Ok(())
    }

    pub async fn watchlist(&self) -> Result<Vec<WatchlistEntry>, DbError> {
        match kv::get(&self.pool, KEY_WATCHLIST).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the watchlist replica and record when the page last changed it.
    pub async fn set_watchlist(
        &self,
        entries: &[WatchlistEntry],
        updated_ms: i64,
    ) -> Result<(), DbError> {
        let encoded = serde_json::to_string(entries)?;
        kv::put(&self.pool, KEY_WATCHLIST, &encoded).await?;
        kv::put(
            &self.pool,
            KEY_WATCHLIST_UPDATED,
            &updated_ms.to_string(),
        )
        .await?;
        Ok(())
    }

    pub async fn watchlist_updated(&self) -> Result<Option<i64>, DbError> {
        match kv::get(&self.pool, KEY_WATCHLIST_UPDATED).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn check_state(&self) -> Result<EpisodeCheckState, DbError> {
        match kv::get(&self.pool, KEY_LAST_CHECKED_EPISODES).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(EpisodeCheckState::new()),
        }
    }

    pub async fn set_check_state(&self, state: &EpisodeCheckState) -> Result<(), DbError> {
        let encoded = serde_json::to_string(state)?;
        kv::put(&self.pool, KEY_LAST_CHECKED_EPISODES, &encoded).await?;
        Ok(())
    }

    /// Epoch millis of the last check pass start; zero when none recorded.
    pub async fn last_check_time(&self) -> Result<i64, DbError> {
        match kv::get(&self.pool, KEY_LAST_CHECK_TIME).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(0),
        }
    }

    pub async fn set_last_check_time(&self, ms: i64) -> Result<(), DbError> {
        kv::put(&self.pool, KEY_LAST_CHECK_TIME, &ms.to_string()).await?;
        Ok(())
    }

    // Lossy readers for the check path. A worker that cannot read its own
    // state should behave like one starting fresh, not stop checking.

    pub async fn credential_or_default(&self) -> Option<String> {
        match self.credential().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key = KEY_TMDB_TOKEN, "state read failed, treating as absent");
                None
            }
        }
    }

    pub async fn watchlist_or_default(&self) -> Vec<WatchlistEntry> {
        match self.watchlist().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key = KEY_WATCHLIST, "state read failed, treating as empty");
                Vec::new()
            }
        }
    }

    pub async fn check_state_or_default(&self) -> EpisodeCheckState {
        match self.check_state().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key = KEY_LAST_CHECKED_EPISODES, "state read failed, starting empty");
                EpisodeCheckState::new()
            }
        }
    }

    pub async fn last_check_time_or_default(&self) -> i64 {
        match self.last_check_time().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key = KEY_LAST_CHECK_TIME, "state read failed, treating as never");
                0
            }
        }
    }
}
