//! Request routing across the shell and runtime cache tiers.
//!
//! Catalog API calls are network-first so data stays fresh but survives
//! offline stretches; images and app shell assets are cache-first since
//! they never change under a URL. Only 2xx responses are ever cached.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::fetch::{FetchedResponse, Fetcher, GatewayRequest};
use crate::store::{CacheStore, CachedResponse};
use crate::{CacheError, CacheNames};

/// URL marker answered synthetically, never forwarded. Pages ping it to
/// keep the worker resident.
pub const KEEPALIVE_MARKER: &str = "keepalive";

/// Host-based routing table.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Host whose requests are treated as catalog API traffic.
    pub catalog_host: String,
    /// Host whose requests are treated as image traffic.
    pub image_host: String,
    /// URLs precached into the shell tier during install.
    pub shell_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Keepalive,
    Catalog,
    Image,
    Other,
}

pub fn classify(url: &str, config: &RoutingConfig) -> RequestClass {
    if url.contains(KEEPALIVE_MARKER) {
        return RequestClass::Keepalive;
    }
    match host_of(url) {
        Some(host) if host == config.catalog_host => RequestClass::Catalog,
        Some(host) if host == config.image_host => RequestClass::Image,
        _ => RequestClass::Other,
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    Some(host.split(':').next().unwrap_or(host))
}

/// Where a gateway response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl GatewayResponse {
    fn from_network(resp: FetchedResponse) -> Self {
        Self {
            status: resp.status,
            content_type: resp.content_type,
            body: resp.body,
            source: ResponseSource::Network,
        }
    }

    fn from_cache(hit: CachedResponse) -> Self {
        Self {
            status: hit.status,
            content_type: hit.content_type,
            body: hit.body,
            source: ResponseSource::Cache,
        }
    }

    fn synthetic_ok() -> Self {
        Self {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: b"OK".to_vec(),
            source: ResponseSource::Synthetic,
        }
    }

    fn synthetic_not_found() -> Self {
        Self {
            status: 404,
            content_type: None,
            body: Vec::new(),
            source: ResponseSource::Synthetic,
        }
    }
}

/// Routes intercepted requests through the cache tiers.
pub struct TierRouter {
    store: CacheStore,
    names: CacheNames,
    fetcher: Arc<dyn Fetcher>,
    config: RoutingConfig,
}

impl TierRouter {
    pub fn new(
        store: CacheStore,
        names: CacheNames,
        fetcher: Arc<dyn Fetcher>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            store,
            names,
            fetcher,
            config,
        }
    }

    /// Precache the shell manifest into the shell tier. Individual URL
    /// failures are logged and skipped so one bad asset cannot block
    /// startup.
    pub async fn install(&self) -> Result<(), CacheError> {
        let shell = self.store.open(self.names.shell()).await?;
        let mut stored = 0usize;
        for url in &self.config.shell_urls {
            match self.fetcher.fetch(&GatewayRequest::get(url)).await {
                Ok(resp) if resp.is_success() => {
                    shell
                        .store(url, resp.status, resp.content_type.as_deref(), &resp.body)
                        .await?;
                    stored += 1;
                }
                Ok(resp) => {
                    warn!(url = %url, status = resp.status, "shell asset fetch returned non-success, skipping");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "shell asset fetch failed, skipping");
                }
            }
        }
        info!(cache = self.names.shell(), stored, total = self.config.shell_urls.len(), "shell tier populated");
        Ok(())
    }

    /// Cut over to this generation: make its tiers exist and delete every
    /// cache belonging to any other generation.
    pub async fn activate(&self) -> Result<(), CacheError> {
        self.store.open(self.names.shell()).await?;
        self.store.open(self.names.runtime()).await?;
        for name in self.store.list().await? {
            if !self.names.is_current(&name) {
                info!(cache = %name, "deleting stale cache");
                self.store.delete(&name).await?;
            }
        }
        Ok(())
    }

    /// Route one intercepted request.
    pub async fn handle(&self, req: &GatewayRequest) -> Result<GatewayResponse, CacheError> {
        if !req.is_get() {
            return self.passthrough(req).await;
        }
        match classify(&req.url, &self.config) {
            RequestClass::Keepalive => {
                debug!(url = %req.url, "keepalive ping answered");
                Ok(GatewayResponse::synthetic_ok())
            }
            RequestClass::Catalog => self.network_first(req).await,
            RequestClass::Image => self.cache_first(req, true).await,
            RequestClass::Other => self.cache_first(req, false).await,
        }
    }

    async fn passthrough(&self, req: &GatewayRequest) -> Result<GatewayResponse, CacheError> {
        let resp = self
            .fetcher
            .fetch(req)
            .await
            .map_err(|e| CacheError::Network(e.to_string()))?;
        Ok(GatewayResponse::from_network(resp))
    }

    async fn network_first(&self, req: &GatewayRequest) -> Result<GatewayResponse, CacheError> {
        match self.fetcher.fetch(req).await {
            Ok(resp) if resp.is_success() => {
                self.store_runtime(&req.url, &resp).await;
                Ok(GatewayResponse::from_network(resp))
            }
            Ok(resp) => {
                if let Some(hit) = self.match_any(&req.url).await {
                    warn!(url = %req.url, status = resp.status, "upstream degraded, serving cached copy");
                    return Ok(GatewayResponse::from_cache(hit));
                }
                Ok(GatewayResponse::from_network(resp))
            }
            Err(e) => {
                if let Some(hit) = self.match_any(&req.url).await {
                    warn!(url = %req.url, error = %e, "upstream unreachable, serving cached copy");
                    return Ok(GatewayResponse::from_cache(hit));
                }
                Err(CacheError::Network(e.to_string()))
            }
        }
    }

    async fn cache_first(
        &self,
        req: &GatewayRequest,
        placeholder_on_failure: bool,
    ) -> Result<GatewayResponse, CacheError> {
        if let Some(hit) = self.match_any(&req.url).await {
            return Ok(GatewayResponse::from_cache(hit));
        }
        match self.fetcher.fetch(req).await {
            Ok(resp) => {
                if resp.is_success() {
                    self.store_runtime(&req.url, &resp).await;
                }
                Ok(GatewayResponse::from_network(resp))
            }
            Err(e) if placeholder_on_failure => {
                debug!(url = %req.url, error = %e, "image unreachable and uncached, serving placeholder");
                Ok(GatewayResponse::synthetic_not_found())
            }
            Err(e) => Err(CacheError::Network(e.to_string())),
        }
    }

    /// Check the shell tier, then the runtime tier. Read failures count
    /// as misses; a request must never fail because the cache is sick.
    async fn match_any(&self, url: &str) -> Option<CachedResponse> {
        for name in [self.names.shell(), self.names.runtime()] {
            let tier = match self.store.open(name).await {
                Ok(tier) => tier,
                Err(e) => {
                    warn!(cache = %name, error = %e, "cache open failed during lookup");
                    continue;
                }
            };
            match tier.lookup(url).await {
                Ok(Some(hit)) => return Some(hit),
                Ok(None) => {}
                Err(e) => {
                    warn!(cache = %name, url = %url, error = %e, "cache lookup failed");
                }
            }
        }
        None
    }

    /// Best-effort write into the runtime tier. Serving the response
    /// always wins over recording it.
    async fn store_runtime(&self, url: &str, resp: &FetchedResponse) {
        let tier = match self.store.open(self.names.runtime()).await {
            Ok(tier) => tier,
            Err(e) => {
                warn!(cache = self.names.runtime(), error = %e, "runtime cache unavailable");
                return;
            }
        };
        if let Err(e) = tier
            .store(url, resp.status, resp.content_type.as_deref(), &resp.body)
            .await
        {
            warn!(url = %url, error = %e, "runtime cache write failed");
        }
    }
}
