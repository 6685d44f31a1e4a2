mod advisor;
mod batch;
mod categories;
mod credentials;
mod error;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod marketplaces;
mod metrics;
mod models;
mod orchestrator;
mod orders;
mod security;
mod store;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use error::{SyncEnvelope, SyncError};
use llm::LlmClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, BulkRequest, DispatchRequest, Marketplace};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use store::Store;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "pazarsync.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let store = Store::from_env().map(Arc::new);
    if store.is_none() {
        warn!(
            target = "pazarsync.api",
            "no datastore configured; stored connections and sync history are disabled"
        );
    }
    let (queue, _worker) = jobs::JobQueue::spawn(store.clone());
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| eyre::eyre!("prometheus recorder: {err}"))?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        store,
        queue,
        llm: Arc::new(LlmClient::from_env()),
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/marketplaces/{marketplace}", post(dispatch_action))
        .route("/marketplaces/{marketplace}/bulk", post(run_bulk_sync))
        .nest(
            "/jobs",
            Router::new()
                .route("/bulk", post(enqueue_bulk_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/ai/category-suggestions", post(category_suggestions))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "pazarsync.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<Store>>,
    queue: jobs::JobQueue,
    llm: Arc<LlmClient>,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, SyncEnvelope>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "pazarsync-api",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            );
        }
    }
    (StatusCode::OK, Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>PazarSync API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn parse_marketplace(slug: &str) -> Result<Marketplace, (StatusCode, Json<ApiError>)> {
    Marketplace::from_slug(slug).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "unknown_marketplace".into(),
                detail: Some(format!("no marketplace named {slug}")),
            }),
        )
    })
}

/// Run one sync action against a marketplace.
///
/// - Method: `POST`
/// - Path: `/marketplaces/{marketplace}`
/// - Auth: `Authorization: Bearer <key>` or `X-Api-Key: <key>`
/// - Body: `DispatchRequest`
/// - Response: the sync envelope, HTTP 200 whether the action succeeded
///   or not; `success` and `error_type` carry the outcome.
async fn dispatch_action(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(slug): Path<String>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<DispatchRequest>,
) -> Result<Json<SyncEnvelope>, (StatusCode, Json<ApiError>)> {
    crate::metrics::inc_requests("/marketplaces");
    let marketplace = parse_marketplace(&slug)?;
    let started = std::time::Instant::now();
    info!(
        target: "pazarsync.api",
        tenant = %context.tenant_id,
        api_key = %context.api_key_id,
        marketplace = marketplace.slug(),
        action = %payload.action,
        "sync action invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let envelope =
                orchestrator::dispatch(state.store.as_deref(), marketplace, payload).await;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &envelope, ttl).await;
            return Ok(Json(envelope));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let envelope = orchestrator::dispatch(state.store.as_deref(), marketplace, payload).await;
        state
            .idempotency
            .lock()
            .await
            .insert(key, envelope.clone());
        return Ok(Json(envelope));
    }

    let envelope = orchestrator::dispatch(state.store.as_deref(), marketplace, payload).await;
    crate::metrics::action_elapsed("/marketplaces", started.elapsed().as_millis());
    Ok(Json(envelope))
}

/// Run a bulk create or bulk stock update synchronously.
///
/// - Method: `POST`
/// - Path: `/marketplaces/{marketplace}/bulk`
/// - Body: `BulkRequest`
async fn run_bulk_sync(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<SyncEnvelope>, (StatusCode, Json<ApiError>)> {
    crate::metrics::inc_requests("/marketplaces/bulk");
    let marketplace = parse_marketplace(&slug)?;
    info!(
        target: "pazarsync.api",
        tenant = %context.tenant_id,
        marketplace = marketplace.slug(),
        action = %payload.action,
        "bulk action invoked",
    );
    let envelope =
        orchestrator::run_bulk(state.store.as_deref(), marketplace, payload, None).await;
    Ok(Json(envelope))
}

#[derive(Debug, Deserialize)]
struct BulkJobRequest {
    marketplace: String,
    #[serde(flatten)]
    request: BulkRequest,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

/// Enqueue a bulk request as a background job.
///
/// - Method: `POST`
/// - Path: `/jobs/bulk`
/// - Body: `BulkJobRequest` (a `BulkRequest` plus `marketplace`)
async fn enqueue_bulk_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<BulkJobRequest>,
) -> Result<Json<EnqueueResponse>, (StatusCode, Json<ApiError>)> {
    crate::metrics::inc_requests("/jobs/bulk");
    let marketplace = parse_marketplace(&payload.marketplace)?;
    info!(
        target: "pazarsync.api",
        tenant = %context.tenant_id,
        marketplace = marketplace.slug(),
        "bulk job enqueued",
    );
    let id = state
        .queue
        .enqueue_bulk(marketplace, payload.request)
        .await
        .map_err(|err| (StatusCode::SERVICE_UNAVAILABLE, Json(err)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, (StatusCode, Json<ApiError>)> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "invalid_job_id".into(),
                detail: None,
            }),
        ));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "not_found".into(),
                detail: None,
            }),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionRequest {
    marketplace: String,
    product_title: String,
    #[serde(default)]
    product_description: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    credentials: Option<std::collections::BTreeMap<String, String>>,
}

/// Ask the advisor for category mapping suggestions on a target marketplace.
///
/// - Method: `POST`
/// - Path: `/ai/category-suggestions`
async fn category_suggestions(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<SuggestionRequest>,
) -> Result<Json<SyncEnvelope>, (StatusCode, Json<ApiError>)> {
    crate::metrics::inc_requests("/ai/category-suggestions");
    let marketplace = parse_marketplace(&payload.marketplace)?;
    if payload.product_title.trim().is_empty() {
        return Ok(Json(SyncEnvelope::err(&SyncError::api(
            "product title is required for category suggestions",
        ))));
    }
    info!(
        target: "pazarsync.api",
        tenant = %context.tenant_id,
        marketplace = marketplace.slug(),
        "category suggestions requested",
    );
    let envelope = match suggest_for(&state, marketplace, &payload).await {
        Ok(suggestions) => SyncEnvelope::ok(json!({ "suggestions": suggestions })),
        Err(err) => SyncEnvelope::err(&err),
    };
    Ok(Json(envelope))
}

async fn suggest_for(
    state: &AppState,
    marketplace: Marketplace,
    payload: &SuggestionRequest,
) -> Result<Vec<advisor::Suggestion>, SyncError> {
    let tree = suggestion_tree(state.store.as_deref(), marketplace, payload).await?;
    let verified = match &state.store {
        Some(store) => store
            .fetch_verified_mappings(marketplace, 50)
            .await
            .unwrap_or_else(|err| {
                warn!(target: "pazarsync.store", error = %err, "verified mappings unavailable");
                Vec::new()
            }),
        None => Vec::new(),
    };
    advisor::suggest(
        &state.llm,
        &payload.product_title,
        payload.product_description.as_deref(),
        &tree,
        &verified,
    )
    .await
}

/// Without a credential source the static fallback tree still grounds the
/// prompt; a connected account gets the live category list instead.
async fn suggestion_tree(
    store: Option<&Store>,
    marketplace: Marketplace,
    payload: &SuggestionRequest,
) -> Result<Vec<models::CategoryNode>, SyncError> {
    if payload.connection_id.is_none() && payload.credentials.is_none() {
        return Ok(categories::fallback_tree(marketplace));
    }
    let (credentials, _) = orchestrator::resolve_credentials(
        store,
        marketplace,
        payload.connection_id.as_deref(),
        payload.credentials.as_ref(),
    )
    .await?;
    let data = orchestrator::execute(
        marketplace,
        orchestrator::Action::FetchCategories,
        &credentials,
        serde_json::Value::Null,
    )
    .await?;
    serde_json::from_value(data["categories"].clone())
        .map_err(|err| SyncError::internal(err.to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        let (queue, _worker) = jobs::JobQueue::spawn(None);
        AppState {
            store: None,
            queue,
            llm: Arc::new(LlmClient::from_env()),
            openapi: Arc::new(json!({})),
            idempotency: Arc::new(Mutex::new(HashMap::new())),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            redis: None,
        }
    }

    fn suggestion_payload(title: &str) -> SuggestionRequest {
        SuggestionRequest {
            marketplace: "shopify".into(),
            product_title: title.into(),
            product_description: None,
            connection_id: None,
            credentials: None,
        }
    }

    #[tokio::test]
    async fn credless_suggestion_grounds_on_fallback_tree() {
        let payload = suggestion_payload("El yapımı kolye");
        let tree = suggestion_tree(None, Marketplace::Shopify, &payload)
            .await
            .unwrap();
        assert!(!tree.is_empty());
        assert_eq!(tree, categories::fallback_tree(Marketplace::Shopify));
    }

    #[tokio::test]
    async fn blank_title_rejected_before_credential_resolution() {
        let state = test_state();
        let context = AuthContext {
            tenant_id: "tenant".into(),
            api_key_id: "key".into(),
        };
        let mut payload = suggestion_payload("   ");
        // a connection id that would fail resolution (no datastore); the
        // title check must reject first, so the error is not CONFIG_MISSING
        payload.connection_id = Some(uuid::Uuid::new_v4().to_string());
        let Json(envelope) =
            category_suggestions(State(state), Extension(context), Json(payload))
                .await
                .unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error_type.as_deref(), Some("API_ERROR"));
    }
}
