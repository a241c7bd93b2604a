use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum_test::TestServer;
use serde_json::{json, Value};

use reelwatch_cache::fetch::{FetchError, FetchedResponse, Fetcher, GatewayRequest};
use reelwatch_cache::policy::{RoutingConfig, TierRouter};
use reelwatch_cache::store::CacheStore;
use reelwatch_cache::CacheNames;
use reelwatch_catalog::provider::CatalogProvider;
use reelwatch_catalog::{CatalogError, SeriesStatus};
use reelwatch_db::state::StateStore;
use reelwatch_worker::messenger::{ClientEvent, ClientRegistry};
use reelwatch_worker::notify::LogSink;
use reelwatch_worker::routes::build_router;
use reelwatch_worker::state::{StandaloneHost, WorkerConfig, WorkerContext};

static APP_SEQ: AtomicU32 = AtomicU32::new(0);

/// Fetcher that replays scripted upstream responses per URL.
#[derive(Default)]
struct ScriptedFetcher {
    script: Mutex<HashMap<String, VecDeque<Result<FetchedResponse, String>>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn enqueue_ok(&self, url: &str, content_type: &str, body: &[u8]) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(FetchedResponse {
                status: 200,
                content_type: Some(content_type.to_string()),
                body: body.to_vec(),
            }));
    }

    fn enqueue_fail(&self, url: &str, why: &str) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(why.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, req: &GatewayRequest) -> Result<FetchedResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&req.url)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(why)) => Err(FetchError(why)),
            None => Err(FetchError(format!("no scripted response for {}", req.url))),
        }
    }
}

/// Catalog that never answers; these tests exercise transport, not checks.
struct NoCatalog;

#[async_trait::async_trait]
impl CatalogProvider for NoCatalog {
    fn name(&self) -> &str {
        "none"
    }

    async fn series_status(
        &self,
        _credential: &str,
        _series_id: i64,
    ) -> Result<SeriesStatus, CatalogError> {
        Err(CatalogError::Provider("not wired in this test".into()))
    }
}

struct TestApp {
    server: TestServer,
    store: StateStore,
    registry: Arc<ClientRegistry>,
    fetcher: Arc<ScriptedFetcher>,
}

/// Create a test server over a throwaway database and cache directory.
async fn test_app() -> TestApp {
    let seq = APP_SEQ.fetch_add(1, Ordering::SeqCst);
    let tag = format!("rw_it_{}_{}", std::process::id(), seq);

    let db_path = std::env::temp_dir().join(format!("{tag}.db"));
    let _ = std::fs::remove_file(&db_path);
    let pool = reelwatch_db::connect(db_path.to_str().unwrap())
        .await
        .unwrap();
    reelwatch_db::migrate::run(&pool).await.unwrap();
    let store = StateStore::new(pool);

    let fetcher = Arc::new(ScriptedFetcher::default());
    let router = TierRouter::new(
        CacheStore::new(std::env::temp_dir().join(format!("{tag}_cache"))),
        CacheNames::for_version("v3"),
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        RoutingConfig {
            catalog_host: "api.themoviedb.org".to_string(),
            image_host: "image.tmdb.org".to_string(),
            shell_urls: Vec::new(),
        },
    );

    let registry = Arc::new(ClientRegistry::new());
    let ctx = WorkerContext {
        store: store.clone(),
        registry: Arc::clone(&registry),
        catalog: Arc::new(NoCatalog),
        notifier: Arc::new(LogSink),
        router: Arc::new(router),
        host: Arc::new(StandaloneHost),
        config: WorkerConfig::default(),
    };

    let app = build_router(reelwatch_worker::hooks::Worker::new(ctx));
    TestApp {
        server: TestServer::new(app).unwrap(),
        store,
        registry,
        fetcher,
    }
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = test_app().await;
    let resp = app.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn store_token_message_persists_credential() {
    let app = test_app().await;
    let resp = app
        .server
        .post("/api/v1/message")
        .json(&json!({"type": "STORE_TMDB_TOKEN", "token": "tok-abc"}))
        .await;
    resp.assert_status(axum::http::StatusCode::ACCEPTED);

    assert_eq!(
        app.store.credential().await.unwrap(),
        Some("tok-abc".to_string())
    );
}

#[tokio::test]
async fn sync_watchlist_message_persists_entries() {
    let app = test_app().await;
    let resp = app
        .server
        .post("/api/v1/message")
        .json(&json!({
            "type": "SYNC_WATCHLIST",
            "watchlist": [
                {"id": 42, "title": "Severance", "media_type": "tv", "vote_average": 8.3},
                {"id": 7, "title": "Heat", "media_type": "movie"}
            ],
            "updated_at": 1756000000000i64
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::ACCEPTED);

    let entries = app.store.watchlist().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, 42);
    assert_eq!(entries[0].title, "Severance");
    // Fields the worker does not model survive the round trip.
    assert_eq!(entries[0].extra["vote_average"], json!(8.3));
    assert_eq!(
        app.store.watchlist_updated().await.unwrap(),
        Some(1756000000000)
    );
}

#[tokio::test]
async fn invalid_messages_are_rejected() {
    let app = test_app().await;
    let resp = app
        .server
        .post("/api/v1/message")
        .json(&json!({"type": "DO_SOMETHING_ELSE"}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn gateway_answers_keepalive_without_upstream() {
    let app = test_app().await;
    let resp = app
        .server
        .get("/gateway")
        .add_query_param("url", "https://api.themoviedb.org/keepalive")
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.text(), "OK");
    assert_eq!(resp.header("x-gateway-source"), "synthetic");
    assert_eq!(app.fetcher.calls(), 0);
}

#[tokio::test]
async fn gateway_serves_images_from_cache_after_first_fetch() {
    let app = test_app().await;
    let url = "https://image.tmdb.org/t/p/w500/poster.jpg";
    app.fetcher.enqueue_ok(url, "image/jpeg", b"jpeg-bytes");

    let first = app.server.get("/gateway").add_query_param("url", url).await;
    first.assert_status_ok();
    assert_eq!(first.header("x-gateway-source"), "network");

    let second = app.server.get("/gateway").add_query_param("url", url).await;
    second.assert_status_ok();
    assert_eq!(second.header("x-gateway-source"), "cache");
    assert_eq!(second.as_bytes().as_ref(), b"jpeg-bytes");
    assert_eq!(app.fetcher.calls(), 1);
}

#[tokio::test]
async fn gateway_falls_back_to_cached_catalog_data_when_offline() {
    let app = test_app().await;
    let url = "https://api.themoviedb.org/3/tv/42";
    app.fetcher
        .enqueue_ok(url, "application/json", br#"{"name":"Severance"}"#);
    app.fetcher.enqueue_fail(url, "connection refused");

    let online = app.server.get("/gateway").add_query_param("url", url).await;
    online.assert_status_ok();
    assert_eq!(online.header("x-gateway-source"), "network");

    let offline = app.server.get("/gateway").add_query_param("url", url).await;
    offline.assert_status_ok();
    assert_eq!(offline.header("x-gateway-source"), "cache");
    assert_eq!(offline.as_bytes().as_ref(), br#"{"name":"Severance"}"#);
}

#[tokio::test]
async fn gateway_reports_upstream_errors_when_nothing_is_cached() {
    let app = test_app().await;
    let url = "https://api.themoviedb.org/3/tv/42";
    app.fetcher.enqueue_fail(url, "connection refused");

    let resp = app.server.get("/gateway").add_query_param("url", url).await;
    resp.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "upstream_failed");
}

#[tokio::test]
async fn notification_click_reuses_an_attached_page() {
    let app = test_app().await;
    let (_id, mut rx) = app.registry.attach("https://app.example/watch");

    let resp = app
        .server
        .post("/api/v1/notifications/click")
        .json(&json!({"action": "open", "url": "/tv/7"}))
        .await;
    resp.assert_status(axum::http::StatusCode::NO_CONTENT);

    assert_eq!(rx.try_recv().unwrap(), ClientEvent::Focus);
    assert_eq!(
        rx.try_recv().unwrap(),
        ClientEvent::Navigate { url: "/tv/7".into() }
    );
}

#[tokio::test]
async fn notification_dismiss_touches_nothing() {
    let app = test_app().await;
    let (_id, mut rx) = app.registry.attach("https://app.example/watch");

    let resp = app
        .server
        .post("/api/v1/notifications/click")
        .json(&json!({"action": "dismiss", "url": "/tv/7"}))
        .await;
    resp.assert_status(axum::http::StatusCode::NO_CONTENT);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sync_endpoints_accept_and_return_immediately() {
    let app = test_app().await;

    let resp = app
        .server
        .post("/api/v1/sync/periodic")
        .json(&json!({"tag": "episode-check"}))
        .await;
    resp.assert_status(axum::http::StatusCode::ACCEPTED);

    let resp = app.server.post("/api/v1/push").json(&json!({})).await;
    resp.assert_status(axum::http::StatusCode::ACCEPTED);
}
