//! Notification payloads, presentation, and click routing.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::messenger::ClientRegistry;
use crate::state::WorkerHost;

pub const DEFAULT_ICON: &str = "/icons/icon-192.png";
pub const BADGE_ICON: &str = "/icons/badge-72.png";
pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

/// What the detector wants shown, before presentation defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCandidate {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub tag: String,
    pub url: String,
}

/// Full platform notification payload. Field names stay camelCase on the
/// wire to match what notification surfaces expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    pub silent: bool,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Expand a candidate into the full payload: fixed badge and vibration,
/// open/dismiss actions, and renotify so a reused tag still alerts.
pub fn build_payload(candidate: &NotificationCandidate) -> NotificationPayload {
    NotificationPayload {
        title: candidate.title.clone(),
        body: candidate.body.clone(),
        icon: candidate.icon.clone(),
        badge: BADGE_ICON.to_string(),
        vibrate: VIBRATE_PATTERN.to_vec(),
        tag: candidate.tag.clone(),
        renotify: true,
        require_interaction: true,
        silent: false,
        data: NotificationData {
            url: candidate.url.clone(),
        },
        actions: vec![
            NotificationAction {
                action: ACTION_OPEN.to_string(),
                title: "Open".to_string(),
            },
            NotificationAction {
                action: ACTION_DISMISS.to_string(),
                title: "Dismiss".to_string(),
            },
        ],
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification error: {0}")]
pub struct NotifyError(pub String);

/// Presentation seam. The daemon default logs; a platform integration
/// would hand the payload to the OS notification surface.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn present(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Sink that records notifications in the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn present(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        info!(
            tag = %payload.tag,
            title = %payload.title,
            url = %payload.data.url,
            "notification"
        );
        Ok(())
    }
}

/// Route a notification click back into the app: dismiss is a no-op;
/// otherwise reuse a controlled page when one exists, else open a new one.
pub fn handle_click(
    registry: &ClientRegistry,
    host: &dyn WorkerHost,
    scope: &str,
    action: &str,
    url: &str,
) {
    if action == ACTION_DISMISS {
        debug!(url = %url, "notification dismissed");
        return;
    }
    if let Some(id) = registry.find_in_scope(scope) {
        if registry.focus_and_navigate(id, url) {
            debug!(client = %id, url = %url, "reused controlled page for notification click");
            return;
        }
    }
    host.open_window(url);
}
