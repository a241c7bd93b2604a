//! Background check scheduling.
//!
//! Checks can arrive from several paths at once: platform periodic sync,
//! the in-process fallback timer, deferred one-shots, page requests, and
//! push. Two layers keep that safe: one-shots re-check wall-clock elapsed
//! time before running, and the detector's spacing floor rejects anything
//! that slips through.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use reelwatch_core::messages::WorkerMessage;

use crate::detector::{EpisodeDetector, PassOutcome};
use crate::state::WorkerContext;

/// Tag under which the worker registers platform sync events.
pub const SYNC_TAG: &str = "episode-check";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Normal spacing between checks.
    pub check_interval: Duration,
    /// Cadence of the in-process timer when platform sync is unavailable.
    pub fallback_interval: Duration,
    /// Delay before the first check after activation.
    pub first_check_delay: Duration,
    /// Delay before retrying after a failed pass.
    pub retry_delay: Duration,
    /// Slack subtracted from `check_interval` when a deferred one-shot
    /// decides whether enough time has passed since the last run.
    pub reschedule_slack: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            fallback_interval: Duration::from_secs(30 * 60),
            first_check_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5 * 60),
            reschedule_slack: Duration::from_secs(60),
        }
    }
}

/// What caused a check invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Startup,
    PeriodicSync,
    ReconnectSync,
    FallbackTimer,
    Scheduled,
    PageRequest,
    Push,
    Retry,
}

impl CheckTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::PeriodicSync => "periodic_sync",
            Self::ReconnectSync => "reconnect_sync",
            Self::FallbackTimer => "fallback_timer",
            Self::Scheduled => "scheduled",
            Self::PageRequest => "page_request",
            Self::Push => "push",
            Self::Retry => "retry",
        }
    }

    /// Only page-initiated checks bypass the spacing floor.
    pub fn is_forced(self) -> bool {
        matches!(self, Self::PageRequest)
    }
}

pub struct Scheduler {
    ctx: WorkerContext,
    detector: EpisodeDetector,
    config: SchedulerConfig,
    /// Fallback timer task; arming again aborts the old one.
    fallback_timer: Mutex<Option<JoinHandle<()>>>,
    /// In-process mirror of the persisted last-check stamp (epoch ms,
    /// zero until a pass runs here). Saves a read on the hot path.
    last_run_ms: AtomicI64,
}

impl Scheduler {
    pub fn new(ctx: WorkerContext, detector: EpisodeDetector, config: SchedulerConfig) -> Self {
        Self {
            ctx,
            detector,
            config,
            fallback_timer: Mutex::new(None),
            last_run_ms: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register background scheduling: platform periodic sync when the
    /// host offers it, the in-process timer otherwise. Always follows up
    /// with one early check. Safe to call again; pages re-request this on
    /// every load.
    pub async fn init(self: &Arc<Self>) {
        match self
            .ctx
            .host
            .register_periodic_sync(SYNC_TAG, self.config.check_interval)
            .await
        {
            Ok(()) => {
                info!(tag = SYNC_TAG, "periodic platform sync registered");
                self.disarm_fallback_timer().await;
            }
            Err(_) => {
                info!(
                    interval_secs = self.config.fallback_interval.as_secs(),
                    "periodic sync unavailable, using fallback timer"
                );
                self.arm_fallback_timer().await;
            }
        }
        self.schedule_check_in(self.config.first_check_delay, CheckTrigger::Startup);
    }

    /// (Re-)arm the fallback timer, aborting any previous one so repeated
    /// registration never stacks timers.
    pub async fn arm_fallback_timer(self: &Arc<Self>) {
        let mut slot = self.fallback_timer.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let scheduler = Arc::clone(self);
        let period = self.config.fallback_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the startup check
            // already covers that moment.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.run_check(CheckTrigger::FallbackTimer).await;
            }
        }));
    }

    async fn disarm_fallback_timer(&self) {
        let mut slot = self.fallback_timer.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// One-shot check after `delay`. When the delay expires, the check
    /// only runs if nearly a full interval has passed since the last run,
    /// so overlapping schedule paths collapse into one check.
    pub fn schedule_check_in(self: &Arc<Self>, delay: Duration, trigger: CheckTrigger) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !scheduler.due_for_check().await {
                debug!(trigger = trigger.as_str(), "skipping scheduled check, one ran recently");
                return;
            }
            scheduler.run_check(trigger).await;
        });
    }

    fn schedule_retry(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let delay = self.config.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deliberately unguarded: the elapsed-time gate would swallow
            // a retry scheduled well inside the normal interval.
            scheduler.run_check(CheckTrigger::Retry).await;
        });
    }

    async fn due_for_check(&self) -> bool {
        let threshold = self
            .config
            .check_interval
            .saturating_sub(self.config.reschedule_slack);
        let last = match self.last_run_ms.load(Ordering::Relaxed) {
            0 => self.ctx.store.last_check_time_or_default().await,
            ms => ms,
        };
        let now = Utc::now().timestamp_millis();
        now.saturating_sub(last) >= threshold.as_millis() as i64
    }

    /// Run one detector pass and apply its outcome: ask pages for missing
    /// state, schedule the next check, or schedule a retry.
    pub async fn run_check(self: &Arc<Self>, trigger: CheckTrigger) {
        info!(trigger = trigger.as_str(), "episode check starting");
        match self.detector.run_pass(trigger.is_forced()).await {
            Ok(PassOutcome::SkippedRecent) => {
                debug!(trigger = trigger.as_str(), "check skipped by spacing floor");
            }
            Ok(PassOutcome::NoCredential) => {
                self.mark_ran();
                let asked = self.ctx.registry.broadcast_all(WorkerMessage::RequestToken);
                warn!(pages = asked, "no catalog credential stored, asked pages to supply one");
            }
            Ok(PassOutcome::EmptyWatchlist) => {
                self.mark_ran();
                if self.ctx.registry.send_to_one(WorkerMessage::RequestWatchlist) {
                    debug!("watchlist empty, requested a copy from a page");
                } else {
                    debug!("watchlist empty and no pages attached");
                }
                self.schedule_check_in(self.config.check_interval, CheckTrigger::Scheduled);
            }
            Ok(PassOutcome::Completed { checked, notified }) => {
                self.mark_ran();
                info!(checked, notified, "episode check completed");
                self.schedule_check_in(self.config.check_interval, CheckTrigger::Scheduled);
            }
            Err(e) => {
                error!(error = %e, "episode check failed, retrying soon");
                self.schedule_retry();
            }
        }
    }

    fn mark_ran(&self) {
        self.last_run_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorConfig;
    use crate::messenger::{ClientEvent, ClientRegistry};
    use crate::notify::{LogSink, NotificationSink};
    use crate::state::{StandaloneHost, SyncUnsupported, WorkerConfig, WorkerHost};
    use reelwatch_cache::fetch::{FetchError, FetchedResponse, Fetcher, GatewayRequest};
    use reelwatch_cache::policy::{RoutingConfig, TierRouter};
    use reelwatch_cache::store::CacheStore;
    use reelwatch_cache::CacheNames;
    use reelwatch_catalog::provider::CatalogProvider;
    use reelwatch_catalog::{CatalogError, SeriesStatus};
    use reelwatch_core::types::{MediaKind, WatchlistEntry};
    use reelwatch_db::state::StateStore;
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    static DB_SEQ: AtomicU32 = AtomicU32::new(0);

    async fn test_store() -> StateStore {
        let path = std::env::temp_dir().join(format!(
            "reelwatch_scheduler_test_{}_{}.sqlite",
            std::process::id(),
            DB_SEQ.fetch_add(1, Ordering::SeqCst),
        ));
        let _ = std::fs::remove_file(&path);
        let pool = reelwatch_db::connect(path.to_str().unwrap()).await.unwrap();
        reelwatch_db::migrate::run(&pool).await.unwrap();
        StateStore::new(pool)
    }

    #[derive(Default)]
    struct CountingCatalog {
        calls: AtomicUsize,
    }

    impl CountingCatalog {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CatalogProvider for CountingCatalog {
        fn name(&self) -> &str {
            "counting"
        }

        async fn series_status(
            &self,
            _credential: &str,
            _series_id: i64,
        ) -> Result<SeriesStatus, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SeriesStatus::default())
        }
    }

    struct UnreachableFetcher;

    #[async_trait::async_trait]
    impl Fetcher for UnreachableFetcher {
        async fn fetch(&self, req: &GatewayRequest) -> Result<FetchedResponse, FetchError> {
            Err(FetchError(format!("no network in tests: {}", req.url)))
        }
    }

    /// Host that accepts periodic sync registration.
    struct SyncCapableHost;

    #[async_trait::async_trait]
    impl WorkerHost for SyncCapableHost {
        async fn register_periodic_sync(
            &self,
            _tag: &str,
            _min_interval: Duration,
        ) -> Result<(), SyncUnsupported> {
            Ok(())
        }

        fn skip_waiting(&self) {}

        fn open_window(&self, _url: &str) {}
    }

    static CACHE_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_router() -> TierRouter {
        let root = std::env::temp_dir().join(format!(
            "reelwatch_scheduler_cache_{}_{}",
            std::process::id(),
            CACHE_SEQ.fetch_add(1, Ordering::SeqCst),
        ));
        TierRouter::new(
            CacheStore::new(root),
            CacheNames::for_version("v3"),
            Arc::new(UnreachableFetcher),
            RoutingConfig {
                catalog_host: "api.example".into(),
                image_host: "img.example".into(),
                shell_urls: Vec::new(),
            },
        )
    }

    struct Fixture {
        scheduler: Arc<Scheduler>,
        store: StateStore,
        catalog: Arc<CountingCatalog>,
        registry: Arc<ClientRegistry>,
    }

    async fn fixture(host: Arc<dyn WorkerHost>, config: SchedulerConfig) -> Fixture {
        let store = test_store().await;
        let catalog = Arc::new(CountingCatalog::default());
        let registry = Arc::new(ClientRegistry::new());
        let ctx = WorkerContext {
            store: store.clone(),
            registry: Arc::clone(&registry),
            catalog: Arc::clone(&catalog) as Arc<dyn CatalogProvider>,
            notifier: Arc::new(LogSink) as Arc<dyn NotificationSink>,
            router: Arc::new(test_router()),
            host,
            config: WorkerConfig::default(),
        };
        let detector = EpisodeDetector::new(
            store.clone(),
            Arc::clone(&catalog) as Arc<dyn CatalogProvider>,
            Arc::new(LogSink),
            DetectorConfig {
                min_pass_spacing: Duration::ZERO,
                pace_delay: Duration::ZERO,
            },
        );
        let scheduler = Arc::new(Scheduler::new(ctx, detector, config));
        Fixture {
            scheduler,
            store,
            catalog,
            registry,
        }
    }

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            check_interval: Duration::from_secs(600),
            fallback_interval: Duration::from_millis(50),
            first_check_delay: Duration::from_millis(10),
            retry_delay: Duration::from_millis(30),
            reschedule_slack: Duration::from_secs(60),
        }
    }

    fn tv_entry(id: i64) -> WatchlistEntry {
        WatchlistEntry {
            id,
            title: format!("Show {id}"),
            media_type: MediaKind::Tv,
            poster_path: None,
            extra: serde_json::Map::new(),
        }
    }

    async fn seed_ready(store: &StateStore) {
        store.set_credential("token").await.unwrap();
        store.set_watchlist(&[tv_entry(1)], 1).await.unwrap();
    }

    #[tokio::test]
    async fn init_without_platform_sync_arms_the_fallback_timer() {
        let f = fixture(Arc::new(StandaloneHost), quick_config()).await;
        seed_ready(&f.store).await;

        f.scheduler.init().await;
        tokio::time::sleep(Duration::from_millis(180)).await;

        // Startup one-shot plus several fallback ticks.
        assert!(f.catalog.calls() >= 2, "calls: {}", f.catalog.calls());
    }

    #[tokio::test]
    async fn init_with_platform_sync_skips_the_fallback_timer() {
        let f = fixture(Arc::new(SyncCapableHost), quick_config()).await;
        seed_ready(&f.store).await;

        f.scheduler.init().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Only the startup one-shot; ticks would have pushed this higher.
        assert_eq!(f.catalog.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_init_does_not_stack_timers() {
        let f = fixture(Arc::new(StandaloneHost), quick_config()).await;
        seed_ready(&f.store).await;

        f.scheduler.init().await;
        f.scheduler.init().await;
        tokio::time::sleep(Duration::from_millis(180)).await;

        // One startup check (the second is elapsed-gated) plus single-timer
        // ticks. Stacked timers would roughly double this.
        let calls = f.catalog.calls();
        assert!((2..=5).contains(&calls), "calls: {calls}");
    }

    #[tokio::test]
    async fn scheduled_checks_skip_when_a_run_was_recent() {
        let f = fixture(Arc::new(SyncCapableHost), quick_config()).await;
        seed_ready(&f.store).await;
        f.store
            .set_last_check_time(Utc::now().timestamp_millis())
            .await
            .unwrap();

        f.scheduler
            .schedule_check_in(Duration::from_millis(10), CheckTrigger::Scheduled);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(f.catalog.calls(), 0);
    }

    #[tokio::test]
    async fn missing_credential_asks_every_page_for_one() {
        let f = fixture(Arc::new(SyncCapableHost), quick_config()).await;
        let (_id, mut rx) = f.registry.attach("https://app.example/watch");

        f.scheduler.run_check(CheckTrigger::Startup).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Message(WorkerMessage::RequestToken)
        );
    }

    #[tokio::test]
    async fn empty_watchlist_asks_one_page_for_a_copy() {
        let f = fixture(Arc::new(SyncCapableHost), quick_config()).await;
        f.store.set_credential("token").await.unwrap();
        let (_id, mut rx) = f.registry.attach("https://app.example/watch");

        f.scheduler.run_check(CheckTrigger::Startup).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Message(WorkerMessage::RequestWatchlist)
        );
    }

    #[tokio::test]
    async fn a_broken_store_does_not_panic_the_check_path() {
        let f = fixture(Arc::new(SyncCapableHost), quick_config()).await;
        f.store.pool().close().await;

        f.scheduler.run_check(CheckTrigger::Startup).await;

        assert_eq!(f.catalog.calls(), 0);
    }

    #[test]
    fn only_page_requests_are_forced() {
        assert!(CheckTrigger::PageRequest.is_forced());
        for trigger in [
            CheckTrigger::Startup,
            CheckTrigger::PeriodicSync,
            CheckTrigger::ReconnectSync,
            CheckTrigger::FallbackTimer,
            CheckTrigger::Scheduled,
            CheckTrigger::Push,
            CheckTrigger::Retry,
        ] {
            assert!(!trigger.is_forced(), "{trigger:?}");
        }
    }
}
