use crate::{CatalogError, SeriesStatus};

/// A catalog backend that can report per-series episode state.
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current episode state for a TV series, authenticating
    /// with the caller-supplied bearer credential.
    async fn series_status(
        &self,
        credential: &str,
        series_id: i64,
    ) -> Result<SeriesStatus, CatalogError>;
}
