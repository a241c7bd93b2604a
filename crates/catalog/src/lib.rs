pub mod provider;
pub mod tmdb;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("not found")]
    NotFound,
}

/// The episode fields the worker reads off a series' last/next episode
/// objects. Everything else the provider returns is ignored.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EpisodeStub {
    pub season_number: i32,
    pub episode_number: i32,
    pub name: Option<String>,
    pub air_date: Option<String>,
}

/// Upstream series state relevant to episode-change detection.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeriesStatus {
    pub name: Option<String>,
    pub last_episode_to_air: Option<EpisodeStub>,
    pub next_episode_to_air: Option<EpisodeStub>,
}
