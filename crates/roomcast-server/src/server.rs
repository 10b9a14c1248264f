//! `RoomcastServer`: Axum HTTP + WebSocket gateway in front of the rooms.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::directory::RoomDirectory;
use crate::handshake::ConnectRequest;
use crate::health::{self, HealthResponse};
use crate::room::RoomDefinition;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionSettings, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Running rooms.
    pub directory: Arc<RoomDirectory>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
}

/// The room gateway.
pub struct RoomcastServer {
    config: Arc<ServerConfig>,
    directory: Arc<RoomDirectory>,
    shutdown: ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RoomcastServer {
    /// Create a server. Every room is an instance of `definition`, capped at
    /// `config.max_connections` sockets.
    pub fn new(config: ServerConfig, definition: RoomDefinition) -> Self {
        let definition = definition.with_max_connections(config.max_connections);
        Self {
            config: Arc::new(config),
            directory: Arc::new(RoomDirectory::new(Arc::new(definition))),
            shutdown: ShutdownCoordinator::new(),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            directory: Arc::clone(&self.directory),
            shutdown: self.shutdown.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            config: Arc::clone(&self.config),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/rooms/{room}/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown. Returns the
    /// bound address and the server task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        info!(%addr, "gateway listening");
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %err, "gateway stopped");
            }
        });
        Ok((addr, task))
    }

    /// Drop a room's in-memory state and restart it against its live
    /// sockets. Returns `false` if the room was never started.
    pub async fn hibernate(&self, room: &str) -> bool {
        self.directory.hibernate(room).await
    }

    /// Running rooms.
    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Gateway configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.directory.connection_count().await;
    let rooms = state.directory.room_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        rooms,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => crate::metrics::render(&handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /rooms/{room}/ws
async fn ws_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let slot = state.directory.get_or_start(&room).await;
    let request = ConnectRequest { room, query };
    let settings = SessionSettings {
        ping_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
        send_buffer: state.config.send_buffer,
    };
    let shutdown = state.shutdown.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = shutdown.spawn(run_ws_session(
                socket,
                slot,
                request,
                settings,
                shutdown.token(),
            ));
        })
}
