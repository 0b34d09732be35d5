use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use testament_registry::{Registration, Registry, WillDraft, WillLedger};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::envelope::{ApiError, Envelope, MISSING_PUBLIC_KEY, MISSING_SIGN_PARAMS};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub wills: WillLedger,
    pub node_id: String,
    pub store_backend: String,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(registry: Registry, wills: WillLedger) -> Self {
        Self {
            registry,
            wills,
            node_id: "testament-node".to_string(),
            store_backend: "memory".to_string(),
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
            metrics: None,
        }
    }

    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: String,
    store: String,
    uptime_secs: u64,
    req_total: u64,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    node_id: String,
    version: &'static str,
    commit: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    #[serde(default)]
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignQuery {
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    witness: Option<String>,
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let app = build_router(state);
    let listener = bind_listener(addr).await?;
    info!("RPC listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("RPC server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind RPC listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind RPC listener on {addr}"))
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

pub fn build_router(state: AppState) -> Router {
    let shared: SharedState = Arc::new(state);
    Router::new()
        .route(
            "/register",
            post(handle_register).fallback(handle_unsupported_method),
        )
        .route("/user", get(handle_show_user).fallback(handle_unsupported_method))
        .route(
            "/admin/list",
            get(handle_list_pending).fallback(handle_unsupported_method),
        )
        .route(
            "/admin/approve",
            get(handle_approve).fallback(handle_unsupported_method),
        )
        .route(
            "/will/create",
            post(handle_create_will).fallback(handle_unsupported_method),
        )
        .route("/will", get(handle_show_will).fallback(handle_unsupported_method))
        .route(
            "/will/list",
            get(handle_list_wills).fallback(handle_unsupported_method),
        )
        .route(
            "/will/witness_sign",
            get(handle_witness_sign).fallback(handle_unsupported_method),
        )
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/metrics", get(handle_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Core paths answer methods they do not serve with an empty envelope.
async fn handle_unsupported_method() -> Envelope {
    Envelope::empty()
}

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("Invalid JSON body: {err}")))
}

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(message))
}

fn processing() -> Result<Envelope, ApiError> {
    Envelope::data(&json!({ "processing": true }))
}

async fn handle_register(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let body = parse_body(&body)?;
    if !body.contains_key("public_key") {
        return Err(ApiError::bad_request(MISSING_PUBLIC_KEY));
    }
    let registration: Registration = serde_json::from_value(Value::Object(body))
        .map_err(|err| ApiError::bad_request(format!("Invalid registration: {err}")))?;

    let receipts = state.registry.register(registration).await?;
    debug!("register receipts: {:?}", receipts);
    processing()
}

async fn handle_show_user(
    State(state): State<SharedState>,
    Query(query): Query<KeyQuery>,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let key = required(query.public_key, MISSING_PUBLIC_KEY)?;
    let record = state.registry.show(&key).await?;
    Envelope::data(&record)
}

async fn handle_list_pending(State(state): State<SharedState>) -> Result<Envelope, ApiError> {
    state.record_request();
    let listing = state.registry.list_pending().await?;
    Ok(Envelope::data(&listing.items)?.with_unresolved(&listing.unresolved))
}

async fn handle_approve(
    State(state): State<SharedState>,
    Query(query): Query<KeyQuery>,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let key = required(query.public_key, MISSING_PUBLIC_KEY)?;
    let record = state.registry.approve(&key).await?;
    Envelope::data(&record)
}

async fn handle_create_will(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let body = parse_body(&body)?;
    if !body.contains_key("public_key") {
        return Err(ApiError::bad_request(MISSING_PUBLIC_KEY));
    }
    let draft: WillDraft = serde_json::from_value(Value::Object(body))
        .map_err(|err| ApiError::bad_request(format!("Invalid will: {err}")))?;

    let receipts = state.wills.create(draft).await?;
    debug!("will receipts: {:?}", receipts);
    processing()
}

async fn handle_show_will(
    State(state): State<SharedState>,
    Query(query): Query<KeyQuery>,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let testator = required(query.public_key, MISSING_PUBLIC_KEY)?;
    let will = state.wills.show(&testator).await?;
    Envelope::data(&will)
}

async fn handle_list_wills(
    State(state): State<SharedState>,
    Query(query): Query<KeyQuery>,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let witness = required(query.public_key, MISSING_PUBLIC_KEY)?;
    let listing = state.wills.list_for_witness(&witness).await?;
    Ok(Envelope::data(&listing.items)?.with_unresolved(&listing.unresolved))
}

async fn handle_witness_sign(
    State(state): State<SharedState>,
    Query(query): Query<SignQuery>,
) -> Result<Envelope, ApiError> {
    state.record_request();
    let testator = required(query.public_key, MISSING_SIGN_PARAMS)?;
    let witness = required(query.witness, MISSING_SIGN_PARAMS)?;
    let will = state.wills.sign(&testator, &witness).await?;
    Envelope::data(&will)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    Json(HealthResponse {
        status: "ok",
        node_id: state.node_id.clone(),
        store: state.store_backend.clone(),
        uptime_secs: state.uptime_seconds(),
        req_total,
    })
}

async fn handle_version(State(state): State<SharedState>) -> Json<VersionResponse> {
    state.record_request();
    Json(VersionResponse {
        node_id: state.node_id.clone(),
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_HASH"),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let req_total = state.record_request();
    let uptime = state.uptime_seconds();

    let mut metrics =
        "# HELP testament_http_requests_total Total number of RPC requests handled\n".to_string();
    metrics.push_str("# TYPE testament_http_requests_total counter\n");
    metrics.push_str(&format!("testament_http_requests_total {req_total}\n"));
    metrics.push_str("# HELP testament_uptime_seconds Uptime of the node in seconds\n");
    metrics.push_str("# TYPE testament_uptime_seconds gauge\n");
    metrics.push_str(&format!("testament_uptime_seconds {uptime}\n"));

    if let Some(handle) = &state.metrics {
        metrics.push_str(&handle.render());
    }

    let mut response = Response::new(Body::from(metrics));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
