//! TMDB (The Movie Database) catalog client.
//!
//! Uses TMDB API v3 with a v4 read access token: https://developer.themoviedb.org/docs

use tracing::debug;

use crate::provider::CatalogProvider;
use crate::{CatalogError, EpisodeStub, SeriesStatus};

/// Host of the catalog API, used by request routing.
pub const API_HOST: &str = "api.themoviedb.org";
/// Host the catalog serves images from.
pub const IMAGE_HOST: &str = "image.tmdb.org";

const BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// Notification-sized poster URL for a TMDB poster path.
pub fn poster_url(path: &str) -> String {
    format!("{IMAGE_BASE}/w500{path}")
}

pub struct TmdbClient {
    client: reqwest::Client,
}

impl TmdbClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn get_json(
        &self,
        credential: &str,
        path: &str,
    ) -> Result<serde_json::Value, CatalogError> {
        let url = format!("{BASE_URL}{path}");
        debug!(url = %url, "TMDB request");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound);
        }

        if !resp.status().is_success() {
            return Err(CatalogError::Provider(format!(
                "TMDB returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| CatalogError::Provider(format!("parse JSON: {e}")))
    }
}

impl Default for TmdbClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CatalogProvider for TmdbClient {
    fn name(&self) -> &str {
        "tmdb"
    }

    async fn series_status(
        &self,
        credential: &str,
        series_id: i64,
    ) -> Result<SeriesStatus, CatalogError> {
        let data = self.get_json(credential, &format!("/tv/{series_id}")).await?;
        Ok(parse_series_status(&data))
    }
}

fn parse_series_status(data: &serde_json::Value) -> SeriesStatus {
    SeriesStatus {
        name: data["name"].as_str().map(|s| s.to_string()),
        last_episode_to_air: parse_episode_stub(&data["last_episode_to_air"]),
        next_episode_to_air: parse_episode_stub(&data["next_episode_to_air"]),
    }
}

fn parse_episode_stub(data: &serde_json::Value) -> Option<EpisodeStub> {
    if !data.is_object() {
        return None;
    }
    Some(EpisodeStub {
        season_number: data["season_number"].as_i64().unwrap_or(0) as i32,
        episode_number: data["episode_number"].as_i64().unwrap_or(0) as i32,
        name: data["name"].as_str().map(|s| s.to_string()),
        air_date: data["air_date"].as_str().map(|s| s.to_string()),
    })
}
