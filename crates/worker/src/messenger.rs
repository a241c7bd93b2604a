//! Cross-context messaging between the worker and attached pages.
//!
//! Pages attach over an event stream and get a per-page channel; the
//! worker addresses them individually or as a group. Requests that expect
//! the same answer from every page broadcast; requests where one answer
//! suffices go to a single page.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use reelwatch_core::messages::{PageMessage, WorkerMessage};
use reelwatch_db::DbError;

use crate::scheduler::{CheckTrigger, Scheduler};
use crate::state::WorkerContext;
use std::sync::Arc;

/// Events delivered to one attached page over its stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A protocol message for the page to act on.
    Message(WorkerMessage),
    /// Bring the page to the foreground.
    Focus,
    /// Steer the page to a URL.
    Navigate { url: String },
}

struct ClientSession {
    page_url: String,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

/// Registry of currently attached pages.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<Uuid, ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a page, returning its id and the receiving end of its
    /// event channel.
    pub fn attach(&self, page_url: &str) -> (Uuid, mpsc::UnboundedReceiver<ClientEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().unwrap().insert(
            id,
            ClientSession {
                page_url: page_url.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    pub fn detach(&self, id: Uuid) {
        if self.sessions.write().unwrap().remove(&id).is_some() {
            debug!(client = %id, "page detached");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Send to every attached page. Returns how many deliveries succeeded;
    /// pages whose channel is gone get pruned.
    pub fn broadcast_all(&self, msg: WorkerMessage) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;
        {
            let sessions = self.sessions.read().unwrap();
            for (id, session) in sessions.iter() {
                if session.tx.send(ClientEvent::Message(msg)).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        self.prune(&dead);
        delivered
    }

    /// Send to one arbitrary attached page. Returns whether any page got it.
    pub fn send_to_one(&self, msg: WorkerMessage) -> bool {
        let mut dead = Vec::new();
        let mut sent = false;
        {
            let sessions = self.sessions.read().unwrap();
            for (id, session) in sessions.iter() {
                if session.tx.send(ClientEvent::Message(msg)).is_ok() {
                    sent = true;
                    break;
                }
                dead.push(*id);
            }
        }
        self.prune(&dead);
        sent
    }

    /// First attached page whose URL falls under `scope`.
    pub fn find_in_scope(&self, scope: &str) -> Option<Uuid> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .iter()
            .find(|(_, s)| scope_matches(&s.page_url, scope))
            .map(|(id, _)| *id)
    }

    /// Focus a page and steer it to `url`. Returns false when the page is
    /// no longer reachable.
    pub fn focus_and_navigate(&self, id: Uuid, url: &str) -> bool {
        let ok = {
            let sessions = self.sessions.read().unwrap();
            match sessions.get(&id) {
                Some(session) => {
                    session.tx.send(ClientEvent::Focus).is_ok()
                        && session
                            .tx
                            .send(ClientEvent::Navigate {
                                url: url.to_string(),
                            })
                            .is_ok()
                }
                None => false,
            }
        };
        if !ok {
            self.prune(&[id]);
        }
        ok
    }

    fn prune(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().unwrap();
        for id in ids {
            sessions.remove(id);
        }
    }
}

/// A root scope matches every page; anything else is a plain prefix.
fn scope_matches(page_url: &str, scope: &str) -> bool {
    scope.is_empty() || scope == "/" || page_url.starts_with(scope)
}

/// Handles messages pages post to the worker. Every arm is idempotent, so
/// pages can re-send freely.
pub struct Messenger {
    ctx: WorkerContext,
    scheduler: Arc<Scheduler>,
}

impl Messenger {
    pub fn new(ctx: WorkerContext, scheduler: Arc<Scheduler>) -> Self {
        Self { ctx, scheduler }
    }

    pub async fn handle(&self, msg: PageMessage) -> Result<(), DbError> {
        match msg {
            PageMessage::SkipWaiting => {
                self.ctx.host.skip_waiting();
                Ok(())
            }
            PageMessage::CheckEpisodes => {
                // Fire and forget: the page asked for a check, not for its result.
                let scheduler = Arc::clone(&self.scheduler);
                tokio::spawn(async move {
                    scheduler.run_check(CheckTrigger::PageRequest).await;
                });
                Ok(())
            }
            PageMessage::StoreTmdbToken { token } => {
                info!("storing catalog credential supplied by a page");
                self.ctx.store.set_credential(&token).await
            }
            PageMessage::SyncWatchlist {
                watchlist,
                updated_at,
            } => {
                let updated_ms = updated_at.unwrap_or_else(|| Utc::now().timestamp_millis());
                debug!(entries = watchlist.len(), "watchlist replica updated");
                self.ctx.store.set_watchlist(&watchlist, updated_ms).await
            }
            PageMessage::StartBackgroundChecks => {
                self.scheduler.init().await;
                Ok(())
            }
        }
    }
}
