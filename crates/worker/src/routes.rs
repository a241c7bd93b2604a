use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use reelwatch_cache::fetch::GatewayRequest;
use reelwatch_cache::policy::ResponseSource;
use reelwatch_core::error::ApiError;
use reelwatch_core::messages::PageMessage;

use crate::error::AppError;
use crate::hooks::Worker;
use crate::scheduler::SYNC_TAG;

pub fn build_router(worker: Worker) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gateway", any(gateway))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        // Pages live on the app origin, the worker on its own; without
        // CORS the event stream and message posts would be refused.
        .layer(CorsLayer::permissive())
        .with_state(worker)
}

fn api_router() -> Router<Worker> {
    Router::new()
        .route("/message", post(post_message))
        .route("/events", get(sse_events))
        .route("/sync/periodic", post(trigger_periodic_sync))
        .route("/sync/one-shot", post(trigger_one_shot_sync))
        .route("/push", post(receive_push))
        .route("/notifications/click", post(notification_click))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(worker): State<Worker>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(worker.context().store.pool())
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Gateway (intercepted requests)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GatewayParams {
    url: String,
}

async fn gateway(
    State(worker): State<Worker>,
    method: Method,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut req = GatewayRequest::new(method.as_str(), &params.url);
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        req = req.with_header("authorization", auth);
    }

    let resp = worker
        .handle_fetch(&req)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let status = StatusCode::from_u16(resp.status)
        .map_err(|_| ApiError::Upstream(format!("bad upstream status {}", resp.status)))?;
    let source = match resp.source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::Synthetic => "synthetic",
    };

    let mut builder = Response::builder()
        .status(status)
        .header("x-gateway-source", source);
    if let Some(ct) = &resp.content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(resp.body))
        .map_err(|e| ApiError::Internal(format!("response build failed: {e}")).into())
}

// ---------------------------------------------------------------------------
// Page messages
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AcceptedResponse {
    status: String,
}

async fn post_message(
    State(worker): State<Worker>,
    Json(msg): Json<PageMessage>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    worker
        .handle_message(msg)
        .await
        .map_err(|e| ApiError::Internal(format!("message handling failed: {e}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Event stream (worker -> page)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EventsParams {
    page_url: Option<String>,
}

struct DetachGuard {
    registry: std::sync::Arc<crate::messenger::ClientRegistry>,
    id: uuid::Uuid,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}

async fn sse_events(
    State(worker): State<Worker>,
    Query(params): Query<EventsParams>,
) -> axum::response::Sse<
    impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    use axum::response::sse::Event;
    use std::time::Duration;

    let page_url = params.page_url.unwrap_or_else(|| "/".to_string());
    let registry = std::sync::Arc::clone(&worker.context().registry);
    let (id, mut rx) = registry.attach(&page_url);
    info!(client = %id, page_url = %page_url, "page attached");

    let stream = async_stream::stream! {
        let _guard = DetachGuard { registry, id };
        while let Some(event) = rx.recv().await {
            let (event_type, data) = match &event {
                crate::messenger::ClientEvent::Message(msg) => {
                    match serde_json::to_string(msg) {
                        Ok(data) => ("message", data),
                        Err(_) => continue,
                    }
                }
                crate::messenger::ClientEvent::Focus => ("focus", "{}".to_string()),
                crate::messenger::ClientEvent::Navigate { url } => {
                    ("navigate", format!(r#"{{"url":{}}}"#, Value::String(url.clone())))
                }
            };
            yield Ok(Event::default().event(event_type).data(data));
        }
    };

    axum::response::Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ---------------------------------------------------------------------------
// Platform sync and push
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SyncBody {
    tag: Option<String>,
}

async fn trigger_periodic_sync(
    State(worker): State<Worker>,
    body: Option<Json<SyncBody>>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let tag = sync_tag(body);
    tokio::spawn(async move { worker.on_periodic_sync(&tag).await });
    accepted()
}

async fn trigger_one_shot_sync(
    State(worker): State<Worker>,
    body: Option<Json<SyncBody>>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let tag = sync_tag(body);
    tokio::spawn(async move { worker.on_sync(&tag).await });
    accepted()
}

fn sync_tag(body: Option<Json<SyncBody>>) -> String {
    body.and_then(|Json(b)| b.tag)
        .unwrap_or_else(|| SYNC_TAG.to_string())
}

fn accepted() -> (StatusCode, Json<AcceptedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
        }),
    )
}

async fn receive_push(
    State(worker): State<Worker>,
    payload: Option<Json<Value>>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let payload = payload.map(|Json(v)| v);
    tokio::spawn(async move { worker.on_push(payload).await });
    accepted()
}

// ---------------------------------------------------------------------------
// Notification clicks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ClickBody {
    #[serde(default)]
    action: String,
    url: Option<String>,
}

async fn notification_click(
    State(worker): State<Worker>,
    Json(body): Json<ClickBody>,
) -> StatusCode {
    let url = body.url.unwrap_or_else(|| "/".to_string());
    worker.on_notification_click(&body.action, &url);
    StatusCode::NO_CONTENT
}
