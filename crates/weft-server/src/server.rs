use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use weft_core::errors::GatewayError;
use weft_telemetry::MetricsRecorder;

use crate::bridge::RequestTable;
use crate::http;
use crate::ingress::{self, WorkerLinks};
use crate::registry::WorkerRegistry;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// A worker whose last heartbeat predates this is evicted.
    pub heartbeat_timeout: Duration,
    /// How often the eviction sweep runs, independent of request traffic.
    pub sweep_interval: Duration,
    /// Model id advertised on `/v1/models`.
    pub advertised_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8686,
            max_send_queue: 256,
            heartbeat_timeout: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
            advertised_model: "claude-web".into(),
        }
    }
}

/// Shared application state passed to Axum handlers. All registries are
/// owned here; there is no module-level state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<WorkerRegistry>,
    pub links: Arc<WorkerLinks>,
    pub table: Arc<RequestTable>,
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.heartbeat_timeout));
        Self {
            config: Arc::new(config),
            registry,
            links: Arc::new(WorkerLinks::new()),
            table: Arc::new(RequestTable::new()),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    /// One sweep pass: evict stale workers and cascade-fail any request
    /// still bound to them.
    pub fn sweep(&self, now: Instant) {
        let evicted = self.registry.evict_stale(now);
        for tab_id in evicted {
            self.links.remove(&tab_id);
            self.table
                .fail(&tab_id, GatewayError::WorkerEvicted(tab_id.to_string()));
            self.metrics.incr_counter("workers_evicted_total", 1);
        }
        self.metrics
            .set_gauge("workers_connected", self.registry.count() as f64);
        self.metrics
            .set_gauge("requests_in_flight", self.table.len() as f64);
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(http::chat_completions))
        .route("/v1/models", get(http::models))
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let port = config.port;
    let sweep_interval = config.sweep_interval;
    let state = AppState::new(config);

    let sweep_state = state.clone();
    let sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweep_state.sweep(Instant::now());
        }
    });

    let router = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "weft gateway started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _sweep: sweep,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade for browser-tab workers.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("worker socket connected");
    ingress::handle_worker_socket(
        socket,
        Arc::clone(&state.registry),
        Arc::clone(&state.links),
        Arc::clone(&state.table),
        state.config.max_send_queue,
    )
    .await;
}
