use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reelwatch_cache::fetch::HttpFetcher;
use reelwatch_cache::policy::{RoutingConfig, TierRouter};
use reelwatch_cache::store::CacheStore;
use reelwatch_cache::{CacheNames, CACHE_VERSION};
use reelwatch_catalog::tmdb::{TmdbClient, API_HOST, IMAGE_HOST};
use reelwatch_db::state::StateStore;
use reelwatch_worker::hooks::Worker;
use reelwatch_worker::messenger::ClientRegistry;
use reelwatch_worker::notify::LogSink;
use reelwatch_worker::state::{StandaloneHost, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // DB path: use REELWATCH_DB env or default
    let db_path = std::env::var("REELWATCH_DB").unwrap_or_else(|_| "reelwatch.db".to_string());
    info!(db_path = %db_path, "connecting to database");

    let pool = reelwatch_db::connect(&db_path)
        .await
        .context("failed to connect to database")?;

    // Run migrations
    reelwatch_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("migrations complete");

    let store = StateStore::new(pool);

    // Seed the catalog credential from env on first run; a token stored by
    // a page later always wins.
    if let Ok(token) = std::env::var("REELWATCH_TMDB_TOKEN") {
        let existing = store
            .credential()
            .await
            .context("failed to read stored credential")?;
        if existing.is_none() && !token.trim().is_empty() {
            store
                .set_credential(&token)
                .await
                .context("failed to seed credential")?;
            info!("catalog credential seeded from environment");
        }
    }

    // Cache layout
    let cache_dir = std::env::var("REELWATCH_CACHE_DIR")
        .unwrap_or_else(|_| "/tmp/reelwatch_cache".to_string());
    let cache_version =
        std::env::var("REELWATCH_CACHE_VERSION").unwrap_or_else(|_| CACHE_VERSION.to_string());

    // App shell served from the frontend origin
    let app_origin = std::env::var("REELWATCH_APP_ORIGIN")
        .unwrap_or_else(|_| "http://localhost:5173".to_string());
    let app_origin = app_origin.trim_end_matches('/').to_string();

    let shell_urls = vec![
        format!("{app_origin}/"),
        format!("{app_origin}/index.html"),
        format!("{app_origin}/manifest.webmanifest"),
        format!("{app_origin}/icons/icon-192.png"),
        format!("{app_origin}/icons/icon-512.png"),
        format!("{app_origin}/icons/badge-72.png"),
    ];

    let router = TierRouter::new(
        CacheStore::new(&cache_dir),
        CacheNames::for_version(&cache_version),
        Arc::new(HttpFetcher::new()),
        RoutingConfig {
            catalog_host: API_HOST.to_string(),
            image_host: IMAGE_HOST.to_string(),
            shell_urls,
        },
    );

    let ctx = WorkerContext {
        store,
        registry: Arc::new(ClientRegistry::new()),
        catalog: Arc::new(TmdbClient::new()),
        notifier: Arc::new(LogSink),
        router: Arc::new(router),
        host: Arc::new(StandaloneHost),
        config: WorkerConfig {
            scope: app_origin.clone(),
        },
    };

    let worker = Worker::new(ctx);

    // Precache the shell; failures leave network-first fallbacks in place
    if let Err(e) = worker.install().await {
        warn!(error = %e, "shell precache incomplete");
    }
    worker
        .activate()
        .await
        .context("failed to activate worker")?;
    info!(cache_version = %cache_version, "worker active");

    let app = reelwatch_worker::routes::build_router(worker);

    let bind_addr = std::env::var("REELWATCH_BIND").unwrap_or_else(|_| "0.0.0.0:8099".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "worker listening");

    axum::serve(listener, app).await?;
    Ok(())
}
