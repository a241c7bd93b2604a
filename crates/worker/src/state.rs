use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use reelwatch_cache::policy::TierRouter;
use reelwatch_catalog::provider::CatalogProvider;
use reelwatch_db::state::StateStore;

use crate::messenger::ClientRegistry;
use crate::notify::NotificationSink;

/// Worker-level settings independent of any one component.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// URL prefix a page must fall under to count as controlled by this
    /// worker. Clicked notifications prefer reusing such a page.
    pub scope: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { scope: "/".into() }
    }
}

/// Everything the worker's components share.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: StateStore,
    pub registry: Arc<ClientRegistry>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub notifier: Arc<dyn NotificationSink>,
    pub router: Arc<TierRouter>,
    pub host: Arc<dyn WorkerHost>,
    pub config: WorkerConfig,
}

/// The platform refused the registration or lacks the capability.
#[derive(Debug, thiserror::Error)]
#[error("periodic background sync unavailable")]
pub struct SyncUnsupported;

/// Host-platform capabilities the worker can use when they exist. The
/// scheduler degrades to its own timer when they do not.
#[async_trait::async_trait]
pub trait WorkerHost: Send + Sync {
    /// Ask the platform to fire periodic sync events under `tag`, at most
    /// once per `min_interval`.
    async fn register_periodic_sync(
        &self,
        tag: &str,
        min_interval: Duration,
    ) -> Result<(), SyncUnsupported>;

    /// Promote a staged update immediately.
    fn skip_waiting(&self);

    /// Open a fresh page at `url` when no controlled page can be reused.
    fn open_window(&self, url: &str);
}

/// Host for running as a plain daemon: no platform scheduler, no staged
/// updates, no way to spawn pages.
pub struct StandaloneHost;

#[async_trait::async_trait]
impl WorkerHost for StandaloneHost {
    async fn register_periodic_sync(
        &self,
        _tag: &str,
        _min_interval: Duration,
    ) -> Result<(), SyncUnsupported> {
        Err(SyncUnsupported)
    }

    fn skip_waiting(&self) {
        info!("skip-waiting requested, nothing staged in standalone mode");
    }

    fn open_window(&self, url: &str) {
        info!(url = %url, "open-window requested, no page host attached");
    }
}
