//! The worker's lifecycle surface.
//!
//! One `Worker` owns every host-facing hook and delegates each to the
//! component responsible for it: the tier router handles intercepted
//! requests, the scheduler handles sync events, the messenger handles
//! page messages, and notification clicks route through the presenter.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use reelwatch_cache::fetch::GatewayRequest;
use reelwatch_cache::policy::GatewayResponse;
use reelwatch_cache::CacheError;
use reelwatch_core::messages::PageMessage;
use reelwatch_db::DbError;

use crate::detector::{DetectorConfig, EpisodeDetector};
use crate::messenger::Messenger;
use crate::notify::{self, NotificationCandidate};
use crate::scheduler::{CheckTrigger, Scheduler, SchedulerConfig, SYNC_TAG};
use crate::state::WorkerContext;

#[derive(Clone)]
pub struct Worker {
    ctx: WorkerContext,
    scheduler: Arc<Scheduler>,
    messenger: Arc<Messenger>,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self::with_configs(ctx, DetectorConfig::default(), SchedulerConfig::default())
    }

    pub fn with_configs(
        ctx: WorkerContext,
        detector_config: DetectorConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let detector = EpisodeDetector::new(
            ctx.store.clone(),
            Arc::clone(&ctx.catalog),
            Arc::clone(&ctx.notifier),
            detector_config,
        );
        let scheduler = Arc::new(Scheduler::new(ctx.clone(), detector, scheduler_config));
        let messenger = Arc::new(Messenger::new(ctx.clone(), Arc::clone(&scheduler)));
        Self {
            ctx,
            scheduler,
            messenger,
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Install: populate the shell tier up front.
    pub async fn install(&self) -> Result<(), CacheError> {
        self.ctx.router.install().await
    }

    /// Activate: cut over stale cache generations, then start background
    /// scheduling.
    pub async fn activate(&self) -> Result<(), CacheError> {
        self.ctx.router.activate().await?;
        self.scheduler.init().await;
        Ok(())
    }

    /// An intercepted request. All routing policy lives in the tier router.
    pub async fn handle_fetch(&self, req: &GatewayRequest) -> Result<GatewayResponse, CacheError> {
        self.ctx.router.handle(req).await
    }

    /// A message posted by a page.
    pub async fn handle_message(&self, msg: PageMessage) -> Result<(), DbError> {
        self.messenger.handle(msg).await
    }

    /// Platform periodic sync fired.
    pub async fn on_periodic_sync(&self, tag: &str) {
        if tag != SYNC_TAG {
            debug!(tag = %tag, "ignoring unknown periodic sync tag");
            return;
        }
        self.scheduler.run_check(CheckTrigger::PeriodicSync).await;
    }

    /// One-off platform sync fired, typically after connectivity returns.
    pub async fn on_sync(&self, tag: &str) {
        if tag != SYNC_TAG {
            debug!(tag = %tag, "ignoring unknown sync tag");
            return;
        }
        self.scheduler.run_check(CheckTrigger::ReconnectSync).await;
    }

    /// A push message arrived. A payload that parses as a notification is
    /// shown directly; anything else triggers an ordinary check.
    pub async fn on_push(&self, payload: Option<Value>) {
        if let Some(value) = &payload {
            if let Some(candidate) = notification_from_push(value) {
                let payload = notify::build_payload(&candidate);
                if let Err(e) = self.ctx.notifier.present(&payload).await {
                    warn!(tag = %payload.tag, error = %e, "push notification present failed");
                }
                return;
            }
        }
        self.scheduler.run_check(CheckTrigger::Push).await;
    }

    /// The user clicked a shown notification.
    pub fn on_notification_click(&self, action: &str, url: &str) {
        notify::handle_click(
            &self.ctx.registry,
            self.ctx.host.as_ref(),
            &self.ctx.config.scope,
            action,
            url,
        );
    }
}

/// A push payload is a notification when it at least carries a title.
fn notification_from_push(value: &Value) -> Option<NotificationCandidate> {
    let title = value["title"].as_str()?;
    Some(NotificationCandidate {
        title: title.to_string(),
        body: value["body"].as_str().unwrap_or_default().to_string(),
        icon: value["icon"].as_str().unwrap_or(notify::DEFAULT_ICON).to_string(),
        tag: value["tag"].as_str().unwrap_or("push").to_string(),
        url: value["url"].as_str().unwrap_or("/").to_string(),
    })
}
