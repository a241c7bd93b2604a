//! Episode-change detection over the watchlist replica.
//!
//! A pass walks the TV entries, asks the catalog for each series' last
//! and next episode, and emits one notification per newly seen episode
//! key. The persisted key map is what makes repeat passes quiet: a key
//! that notified once never notifies again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};

use reelwatch_catalog::provider::CatalogProvider;
use reelwatch_catalog::{EpisodeStub, SeriesStatus};
use reelwatch_core::airdate;
use reelwatch_core::types::{
    aired_episode_key, episode_tag, upcoming_episode_key, MediaKind, WatchlistEntry,
};
use reelwatch_db::state::{EpisodeCheckState, StateStore};
use reelwatch_db::DbError;

use crate::notify::{build_payload, NotificationCandidate, NotificationSink, DEFAULT_ICON};

/// Spacing and pacing knobs for a pass.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Hard floor between passes, applied no matter which path scheduled
    /// the check.
    pub min_pass_spacing: Duration,
    /// Delay between consecutive catalog calls within one pass.
    pub pace_delay: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_pass_spacing: Duration::from_secs(5 * 60),
            pace_delay: Duration::from_millis(300),
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A pass ran too recently; nothing was read or written.
    SkippedRecent,
    /// No catalog credential is stored.
    NoCredential,
    /// The watchlist replica is empty.
    EmptyWatchlist,
    Completed { checked: usize, notified: usize },
}

#[derive(Clone)]
pub struct EpisodeDetector {
    store: StateStore,
    catalog: Arc<dyn CatalogProvider>,
    notifier: Arc<dyn NotificationSink>,
    config: DetectorConfig,
}

impl EpisodeDetector {
    pub fn new(
        store: StateStore,
        catalog: Arc<dyn CatalogProvider>,
        notifier: Arc<dyn NotificationSink>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            config,
        }
    }

    /// Run one pass. `force` bypasses the spacing floor; page-requested
    /// checks are trusted to mean it.
    pub async fn run_pass(&self, force: bool) -> Result<PassOutcome, DbError> {
        let now_ms = Utc::now().timestamp_millis();
        if !force {
            let last = self.store.last_check_time_or_default().await;
            let elapsed = now_ms - last;
            if elapsed < self.config.min_pass_spacing.as_millis() as i64 {
                debug!(elapsed_ms = elapsed, "pass skipped, previous check too recent");
                return Ok(PassOutcome::SkippedRecent);
            }
        }

        // Stamp before any network work so a slow or crashing pass still
        // holds the floor against re-entry.
        self.store.set_last_check_time(now_ms).await?;

        let Some(credential) = self.store.credential_or_default().await else {
            return Ok(PassOutcome::NoCredential);
        };

        let watchlist = self.store.watchlist_or_default().await;
        if watchlist.is_empty() {
            return Ok(PassOutcome::EmptyWatchlist);
        }

        let series: Vec<&WatchlistEntry> = watchlist
            .iter()
            .filter(|e| e.media_type == MediaKind::Tv)
            .collect();

        let mut seen = self.store.check_state_or_default().await;
        let mut candidates: Vec<NotificationCandidate> = Vec::new();
        let now_local = Local::now();

        for (i, entry) in series.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.pace_delay).await;
            }
            let status = match self.catalog.series_status(&credential, entry.id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(series_id = entry.id, title = %entry.title, error = %e, "series status fetch failed, skipping");
                    continue;
                }
            };
            collect_candidates(entry, &status, now_local, now_ms, &mut seen, &mut candidates);
        }

        // One write for the whole pass; a failure loses the pass, not
        // part of it.
        self.store.set_check_state(&seen).await?;

        for candidate in &candidates {
            let payload = build_payload(candidate);
            if let Err(e) = self.notifier.present(&payload).await {
                warn!(tag = %payload.tag, error = %e, "notification present failed");
            }
        }

        info!(
            checked = series.len(),
            notified = candidates.len(),
            "episode pass finished"
        );
        Ok(PassOutcome::Completed {
            checked: series.len(),
            notified: candidates.len(),
        })
    }
}

/// Apply both episode conditions for one series. The conditions are
/// independent: a show can produce an aired and an airs-today
/// notification from the same pass.
fn collect_candidates(
    entry: &WatchlistEntry,
    status: &SeriesStatus,
    now_local: DateTime<Local>,
    now_ms: i64,
    seen: &mut EpisodeCheckState,
    out: &mut Vec<NotificationCandidate>,
) {
    if let Some(last) = &status.last_episode_to_air {
        if let Some(date) = last.air_date.as_deref().and_then(airdate::parse_air_date) {
            if airdate::aired_recently(now_local, date) {
                let key = aired_episode_key(entry.id, last.season_number, last.episode_number);
                if !seen.contains_key(&key) {
                    out.push(aired_candidate(entry, last, &key));
                    seen.insert(key, now_ms);
                }
            }
        }
    }

    if let Some(next) = &status.next_episode_to_air {
        if let Some(date) = next.air_date.as_deref().and_then(airdate::parse_air_date) {
            if airdate::airs_today(now_local, date) {
                let key = upcoming_episode_key(entry.id, next.season_number, next.episode_number);
                if !seen.contains_key(&key) {
                    out.push(upcoming_candidate(entry, next, &key));
                    seen.insert(key, now_ms);
                }
            }
        }
    }
}

fn episode_label(stub: &EpisodeStub) -> String {
    match &stub.name {
        Some(name) => format!("S{}E{} \"{name}\"", stub.season_number, stub.episode_number),
        None => format!("S{}E{}", stub.season_number, stub.episode_number),
    }
}

fn icon_for(entry: &WatchlistEntry) -> String {
    entry
        .poster_path
        .as_deref()
        .map(reelwatch_catalog::tmdb::poster_url)
        .unwrap_or_else(|| DEFAULT_ICON.to_string())
}

fn aired_candidate(entry: &WatchlistEntry, stub: &EpisodeStub, key: &str) -> NotificationCandidate {
    NotificationCandidate {
        title: format!("New episode: {}", entry.title),
        body: format!("{} is out now.", episode_label(stub)),
        icon: icon_for(entry),
        tag: episode_tag(key),
        url: format!("/tv/{}", entry.id),
    }
}

fn upcoming_candidate(
    entry: &WatchlistEntry,
    stub: &EpisodeStub,
    key: &str,
) -> NotificationCandidate {
    NotificationCandidate {
        title: format!("Airing today: {}", entry.title),
        body: format!("{} airs today.", episode_label(stub)),
        icon: icon_for(entry),
        tag: episode_tag(key),
        url: format!("/tv/{}", entry.id),
    }
}
