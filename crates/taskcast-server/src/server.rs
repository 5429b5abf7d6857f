//! `TaskcastServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use taskcast_broker::BrokerRegistry;
use taskcast_core::ConnectionId;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::control;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broker state shared by every session and the control plane.
    pub registry: Arc<BrokerRegistry>,
    /// Stop signal and live-session tracking.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Limits and heartbeat timing.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start, for `/health`.
    pub started_at: DateTime<Utc>,
    /// Open WebSocket sessions.
    pub connections: Arc<AtomicUsize>,
}

/// The broker's network front end.
pub struct TaskcastServer {
    config: Arc<ServerConfig>,
    registry: Arc<BrokerRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    connections: Arc<AtomicUsize>,
}

impl TaskcastServer {
    /// Server over `registry`; nothing is bound until [`listen`](Self::listen).
    pub fn new(config: ServerConfig, registry: Arc<BrokerRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// Control-plane routes are also served under `/MessageQueueServices`.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            connections: self.connections.clone(),
        };

        let control_routes = Router::new()
            .route("/Channels/Create", post(control::create_channel))
            .route("/Channels/{channelName}/CreateTask", post(control::create_task));

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .merge(control_routes.clone())
            .nest("/MessageQueueServices", control_routes)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, max_connections = self.config.max_connections, "taskcast server listening");

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated with error");
            }
        });
        Ok((addr, handle))
    }

    /// Broker registry behind this server.
    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    /// Drain handle for this server.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Open WebSocket sessions.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// One reserved WebSocket session; released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if previous >= max {
            let _ = counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(Arc::clone(counter)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.load(Ordering::SeqCst);
    let channels = state.registry.channel_count().await;
    Json(health::health_check(state.start_time, state.started_at, connections, channels))
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Some(slot) = ConnectionSlot::acquire(&state.connections, state.config.max_connections) else {
        warn!(max_connections = state.config.max_connections, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let connection_id = ConnectionId::new();
    let registry = state.registry.clone();
    let config = state.config.clone();
    let shutdown = Arc::clone(&state.shutdown);
    let token = shutdown.token();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            shutdown
                .run_session(run_ws_session(socket, connection_id, registry, config, token))
                .await;
        })
}
