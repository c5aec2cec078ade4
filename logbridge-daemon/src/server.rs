//! Axum HTTP server: WebSocket subscriber endpoint and read-only ops surface.
//!
//! Routes:
//! - `GET /ws` — WebSocket endpoint. The first client frame must be
//!   `subscribe` with a bearer token; the token is checked against the
//!   [`ProjectAuthorizer`] before the session joins the hub.
//! - `GET /api/connections` — connection status projection.
//! - `GET /healthz` — aggregated component health (503 when unhealthy).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logbridge_broadcast::{ClientFrame, HubHandle, ServerFrame, SubscriberHandle};
use logbridge_core::config::ServerConfig;
use logbridge_core::error::LogbridgeError;
use logbridge_core::pipeline::{DynPipeline, HealthStatus, Pipeline};
use logbridge_core::storage::LogStore;
use logbridge_core::types::LogLevel;
use logbridge_manager::StreamManager;

use crate::orchestrator::SharedPipelines;

/// Decides whether a token may subscribe to a project's stream.
///
/// Token issuance and rotation are outside this system; the daemon only
/// checks presented tokens at the WebSocket handshake.
pub trait ProjectAuthorizer: Send + Sync {
    fn authorize(&self, project_id: &str, token: &str) -> bool;
}

/// Authorizer backed by the `[server] static_tokens` config list.
///
/// Each entry has the form `project_id:token`. Malformed entries are
/// skipped with a warning at construction time.
pub struct StaticTokenAuthorizer {
    tokens: HashSet<(String, String)>,
}

impl StaticTokenAuthorizer {
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut tokens = HashSet::new();
        for entry in &config.static_tokens {
            match entry.split_once(':') {
                Some((project, token)) if !project.is_empty() && !token.is_empty() => {
                    tokens.insert((project.to_string(), token.to_string()));
                }
                _ => {
                    tracing::warn!(entry, "ignoring malformed static token entry");
                }
            }
        }
        Self { tokens }
    }
}

impl ProjectAuthorizer for StaticTokenAuthorizer {
    fn authorize(&self, project_id: &str, token: &str) -> bool {
        self.tokens
            .contains(&(project_id.to_string(), token.to_string()))
    }
}

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub log_store: Arc<dyn LogStore>,
    pub manager: Arc<Mutex<StreamManager>>,
    pub pipelines: SharedPipelines,
    pub authorizer: Arc<dyn ProjectAuthorizer>,
    /// Upper bound on `request_logs` backfill size.
    pub backfill_limit: usize,
    /// Sessions idle longer than twice this are disconnected.
    pub heartbeat: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/connections", get(list_connections))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn list_connections(State(state): State<AppState>) -> Response {
    let summaries = state.manager.lock().await.list();
    Json(summaries).into_response()
}

#[derive(Serialize)]
struct ComponentHealth {
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    components: Vec<ComponentHealth>,
}

async fn healthz(State(state): State<AppState>) -> Response {
    let mut components = Vec::new();
    let mut degraded = false;
    let mut unhealthy = false;
    {
        let pipelines = state.pipelines.lock().await;
        for pipeline in pipelines.iter() {
            let (status, detail) = match pipeline.health_check().await {
                HealthStatus::Healthy => ("healthy", None),
                HealthStatus::Degraded(detail) => {
                    degraded = true;
                    ("degraded", Some(detail))
                }
                HealthStatus::Unhealthy(detail) => {
                    unhealthy = true;
                    ("unhealthy", Some(detail))
                }
            };
            components.push(ComponentHealth {
                name: pipeline.name().to_string(),
                status,
                detail,
            });
        }
    }

    let (code, status) = if unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if degraded {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };
    (code, Json(HealthResponse { status, components })).into_response()
}

/// One WebSocket session: handshake, then frame pump until either side
/// closes or the idle deadline passes.
async fn session(mut socket: WebSocket, state: AppState) {
    let Some(subscriber) = handshake(&mut socket, &state).await else {
        return;
    };
    let subscriber_id = subscriber.id.clone();
    run_session(&mut socket, &state, &subscriber).await;
    state.hub.unsubscribe(&subscriber_id);
}

/// Reads the first frame and validates the subscription request.
/// Rejections send an `error` frame before closing.
async fn handshake(socket: &mut WebSocket, state: &AppState) -> Option<SubscriberHandle> {
    let frame = loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => break parse_frame(text.as_str()),
            Ok(Message::Close(_)) | Err(_) => return None,
            // Ignore transport-level ping/pong/binary before the handshake
            Ok(_) => continue,
        }
    };

    let (project_id, token) = match frame {
        Some(ClientFrame::Subscribe { project_id, token }) => (project_id, token),
        _ => {
            let reject = ServerFrame::error("bad_handshake", "first frame must be subscribe");
            send_frame(socket, &reject).await;
            return None;
        }
    };

    if !state.authorizer.authorize(&project_id, &token) {
        tracing::warn!(project_id, "subscription rejected: invalid token");
        let reject = ServerFrame::error("unauthorized", "invalid project token");
        send_frame(socket, &reject).await;
        return None;
    }

    Some(state.hub.subscribe(project_id))
}

async fn run_session(socket: &mut WebSocket, state: &AppState, subscriber: &SubscriberHandle) {
    let idle_timeout = state.heartbeat * 2;
    let mut deadline = tokio::time::Instant::now() + idle_timeout;
    let mut filters: Vec<LogLevel> = Vec::new();

    loop {
        tokio::select! {
            _ = subscriber.wait() => {
                for frame in subscriber.drain() {
                    let Some(frame) = filter_frame(frame, &filters) else {
                        continue;
                    };
                    if !send_frame(socket, &frame).await {
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::info!(
                    subscriber_id = %subscriber.id,
                    idle_secs = idle_timeout.as_secs(),
                    "subscriber idle past heartbeat window, disconnecting"
                );
                return;
            }
            incoming = socket.recv() => {
                deadline = tokio::time::Instant::now() + idle_timeout;
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(frame) = parse_frame(text.as_str()) else {
                            let err = ServerFrame::error("bad_frame", "unparseable client frame");
                            if !send_frame(socket, &err).await {
                                return;
                            }
                            continue;
                        };
                        if !handle_client_frame(socket, state, subscriber, frame, &mut filters)
                            .await
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket receive failed");
                        return;
                    }
                    // Transport ping/pong handled by the websocket layer
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Handles one control frame. Returns false when the socket is dead.
async fn handle_client_frame(
    socket: &mut WebSocket,
    state: &AppState,
    subscriber: &SubscriberHandle,
    frame: ClientFrame,
    filters: &mut Vec<LogLevel>,
) -> bool {
    match frame {
        ClientFrame::Ping => send_frame(socket, &ServerFrame::pong()).await,
        ClientFrame::SetFilters { levels } => {
            *filters = levels.clone();
            send_frame(socket, &ServerFrame::FiltersUpdated { levels }).await
        }
        ClientFrame::RequestStats => {
            let stats = state.hub.stats().for_project(&subscriber.project_id);
            send_frame(socket, &ServerFrame::Stats { stats }).await
        }
        ClientFrame::RequestLogs { limit } => {
            let limit = limit
                .unwrap_or(state.backfill_limit)
                .min(state.backfill_limit);
            match state.log_store.recent(&subscriber.project_id, limit).await {
                Ok(entries) => send_frame(socket, &ServerFrame::Backfill { entries }).await,
                Err(err) => {
                    tracing::warn!(
                        project_id = %subscriber.project_id,
                        error = %err,
                        "backfill query failed"
                    );
                    let frame = ServerFrame::error("backfill_failed", "log store unavailable");
                    send_frame(socket, &frame).await
                }
            }
        }
        ClientFrame::Subscribe { .. } => {
            let frame = ServerFrame::error("already_subscribed", "session is already bound");
            send_frame(socket, &frame).await
        }
    }
}

fn parse_frame(text: &str) -> Option<ClientFrame> {
    serde_json::from_str(text).ok()
}

/// Applies the session's level filter to outgoing frames.
/// Only log batches are filtered; a fully filtered batch is dropped.
fn filter_frame(frame: ServerFrame, filters: &[LogLevel]) -> Option<ServerFrame> {
    if filters.is_empty() {
        return Some(frame);
    }
    match frame {
        ServerFrame::Logs { entries } => {
            let entries: Vec<_> = entries
                .into_iter()
                .filter(|e| filters.contains(&e.level))
                .collect();
            if entries.is_empty() {
                None
            } else {
                Some(ServerFrame::Logs { entries })
            }
        }
        other => Some(other),
    }
}

/// Serializes and sends a frame. Returns false when the socket is dead.
async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "frame serialization failed");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

/// The HTTP server as a supervised component.
pub struct WsServer {
    bind_addr: String,
    state: AppState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    started: bool,
}

impl WsServer {
    pub fn new(bind_addr: impl Into<String>, state: AppState) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            state,
            cancel: CancellationToken::new(),
            task: None,
            started: false,
        }
    }
}

impl Pipeline for WsServer {
    fn name(&self) -> &str {
        "ws-server"
    }

    async fn start(&mut self) -> Result<(), LogbridgeError> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(bind_addr = %self.bind_addr, "http server listening");

        let app = router(self.state.clone());
        let shutdown = self.cancel.clone().cancelled_owned();
        self.task = Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %err, "http server terminated");
            }
        }));
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogbridgeError> {
        if !self.started {
            return Ok(());
        }
        tracing::info!("http server stopping");
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "http server join failed");
        }
        self.started = false;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.started {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy("not started".to_string())
        }
    }
}
