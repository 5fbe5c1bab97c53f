//! WebSocket gateway server.
//!
//! Accepts client WebSocket connections on `/` and `/ws`, greets each client,
//! and dispatches its requests. Every `subscribe` and `subscribe_batch` runs
//! as its own task tracked in the [`ConnectionRegistry`], so a client can
//! have any number of lineages in flight.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{self, ClientRequest};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::stats::resident_memory_bytes;
use crate::application::services::{BatchConfig, BatchOrchestrator, SessionContext, run_lineage};
use crate::domain::events::{MemoryUsage, ServerMessage};
use crate::domain::quote::{Credentials, StockCode, SubscriptionRequest};
use crate::infrastructure::metrics;

/// Capacity of each client's outgoing message queue.
const OUTBOUND_CAPACITY: usize = 256;

// =============================================================================
// Gateway State
// =============================================================================

/// Process-wide state shared by every client connection.
pub struct GatewayState {
    registry: ConnectionRegistry,
    sessions: SessionContext,
    batches: BatchOrchestrator,
    tasks: TaskTracker,
    version: String,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl GatewayState {
    /// Create gateway state.
    #[must_use]
    pub fn new(
        sessions: SessionContext,
        batch: BatchConfig,
        version: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            batches: BatchOrchestrator::new(sessions.clone(), batch),
            sessions,
            tasks: TaskTracker::new(),
            version: version.into(),
            started_at: Instant::now(),
            shutdown,
        }
    }

    /// Connected clients and their sessions.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Gateway version reported to clients.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until every subscription and batch task has finished.
    ///
    /// No new tasks are accepted once this is called. Pair it with
    /// [`ConnectionRegistry::drain`] so running sessions close their broker
    /// connections and return.
    pub async fn wait_for_sessions(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn health_report(&self) -> ServerMessage {
        ServerMessage::Health {
            status: "ok".to_string(),
            uptime: self.uptime().as_secs_f64(),
            connections: self.registry.connection_count(),
            memory: MemoryUsage {
                rss: resident_memory_bytes(),
            },
        }
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("version", &self.version)
            .field("connections", &self.registry.connection_count())
            .field("sessions", &self.registry.session_count())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Gateway Server
// =============================================================================

/// WebSocket server for price clients.
pub struct GatewayServer {
    port: u16,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>) -> Self {
        Self { port, state }
    }

    /// Bind the configured port and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `GatewayServerError` if binding fails or the server stops
    /// with an error.
    pub async fn run(self) -> Result<(), GatewayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "WebSocket server listening");
        serve(listener, self.state).await
    }
}

/// Routes served by the gateway.
#[must_use]
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve clients on an already bound listener until shutdown.
///
/// # Errors
///
/// Returns `GatewayServerError::ServerFailed` if the server stops with an
/// error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
) -> Result<(), GatewayServerError> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| GatewayServerError::ServerFailed(e.to_string()))?;

    tracing::info!("WebSocket server stopped");
    Ok(())
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let (connection, _cancel) = state.registry.register();
    metrics::set_clients(state.registry.connection_count());
    tracing::info!(
        %connection,
        clients = state.registry.connection_count(),
        "Client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, kind = message.kind(), "Failed to encode message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    reply(&tx, ServerMessage::welcome(state.version.clone())).await;

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&state, connection, text.as_str(), &tx).await;
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&state, connection, text, &tx).await,
                    Err(e) => {
                        reply(&tx, ServerMessage::request_error(e.to_string())).await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(%connection, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    let live = state.registry.unregister(connection);
    drop(tx);
    send_task.abort();

    metrics::set_clients(state.registry.connection_count());
    metrics::set_live_sessions(state.registry.session_count());
    tracing::info!(
        %connection,
        cancelled_sessions = live,
        clients = state.registry.connection_count(),
        "Client disconnected"
    );
}

async fn handle_text(
    state: &Arc<GatewayState>,
    connection: ConnectionId,
    text: &str,
    tx: &mpsc::Sender<ServerMessage>,
) {
    let request = match protocol::decode(text) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(%connection, error = %e, "Rejected client message");
            reply(tx, ServerMessage::request_error(e.to_string())).await;
            return;
        }
    };
    metrics::record_client_message(request.kind());

    match request {
        ClientRequest::Ping => {
            let timestamp = chrono::Utc::now().timestamp_millis();
            reply(tx, ServerMessage::Pong { timestamp }).await;
        }
        ClientRequest::Health => {
            reply(tx, state.health_report()).await;
        }
        ClientRequest::Subscribe {
            code,
            credentials,
            user_id,
        } => {
            let request = SubscriptionRequest::new(code, credentials, user_id);
            spawn_subscription(state, connection, request, tx.clone());
        }
        ClientRequest::SubscribeBatch {
            codes,
            credentials,
            user_id,
        } => {
            spawn_batch(state, connection, codes, credentials, user_id, tx.clone());
        }
    }
}

/// Queue a reply for the client unless its connection is gone.
async fn reply(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    let kind = message.kind();
    if tx.send(message).await.is_err() {
        tracing::debug!(kind, "Client event channel closed");
    }
}

fn spawn_subscription(
    state: &Arc<GatewayState>,
    connection: ConnectionId,
    request: SubscriptionRequest,
    events: mpsc::Sender<ServerMessage>,
) {
    let Some((session, cancel)) = state.registry.start_session(connection) else {
        return;
    };
    metrics::record_session_started();
    metrics::set_live_sessions(state.registry.session_count());
    tracing::debug!(%connection, %session, code = request.code(), "Starting subscription");

    let tracked = Arc::clone(state);
    state.tasks.spawn(async move {
        let state = tracked;
        let started = Instant::now();
        let code = request.code().to_string();
        let report = run_lineage(request, &state.sessions, &events, &cancel).await;

        metrics::record_session_outcome(report.outcome.label(), started.elapsed());
        state.registry.finish_session(connection, session);
        metrics::set_live_sessions(state.registry.session_count());
        tracing::debug!(
            %connection,
            %session,
            code = %code,
            outcome = report.outcome.label(),
            attempts = report.attempts,
            "Subscription finished"
        );
    });
}

fn spawn_batch(
    state: &Arc<GatewayState>,
    connection: ConnectionId,
    codes: Vec<StockCode>,
    credentials: Credentials,
    user_id: Option<String>,
    events: mpsc::Sender<ServerMessage>,
) {
    let Some((session, cancel)) = state.registry.start_session(connection) else {
        return;
    };
    metrics::record_batch();
    metrics::set_live_sessions(state.registry.session_count());

    let tracked = Arc::clone(state);
    state.tasks.spawn(async move {
        let state = tracked;
        let summary = state
            .batches
            .run(codes, credentials, user_id, events, cancel)
            .await;

        state.registry.finish_session(connection, session);
        metrics::set_live_sessions(state.registry.session_count());
        tracing::debug!(
            %connection,
            %session,
            total = summary.total,
            succeeded = summary.succeeded,
            cancelled = summary.cancelled,
            "Batch finished"
        );
    });
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::SessionConfig;
    use crate::infrastructure::dnse::MockCredentialProvider;
    use crate::infrastructure::mqtt::MockBrokerConnector;
    use crate::infrastructure::persistence::InMemoryStockRepository;

    fn state() -> GatewayState {
        let ctx = SessionContext::new(
            Arc::new(MockBrokerConnector::new()),
            Arc::new(MockCredentialProvider::new()),
            Arc::new(InMemoryStockRepository::new()),
            SessionConfig::default(),
        );
        GatewayState::new(ctx, BatchConfig::default(), "1.2.3", CancellationToken::new())
    }

    #[test]
    fn health_report_counts_connections() {
        let state = state();
        state.registry().register();
        state.registry().register();

        match state.health_report() {
            ServerMessage::Health {
                status,
                connections,
                uptime,
                ..
            } => {
                assert_eq!(status, "ok");
                assert_eq!(connections, 2);
                assert!(uptime >= 0.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn shutdown_flag_follows_token() {
        let token = CancellationToken::new();
        let ctx = SessionContext::new(
            Arc::new(MockBrokerConnector::new()),
            Arc::new(MockCredentialProvider::new()),
            Arc::new(InMemoryStockRepository::new()),
            SessionConfig::default(),
        );
        let state = GatewayState::new(ctx, BatchConfig::default(), "v", token.clone());

        assert!(!state.is_shutting_down());
        token.cancel();
        assert!(state.is_shutting_down());
        assert_eq!(state.version(), "v");
    }

    #[tokio::test(start_paused = true)]
    async fn draining_waits_for_sessions_to_close_upstream() {
        let broker = MockBrokerConnector::new();
        let ctx = SessionContext::new(
            Arc::new(broker.clone()),
            Arc::new(MockCredentialProvider::new()),
            Arc::new(InMemoryStockRepository::new()),
            SessionConfig::default(),
        );
        let state = Arc::new(GatewayState::new(
            ctx,
            BatchConfig::default(),
            "v",
            CancellationToken::new(),
        ));
        let (connection, _cancel) = state.registry().register();
        let (tx, mut rx) = mpsc::channel(16);

        let request = SubscriptionRequest::new("VIC", Credentials::new("t1", "i1"), None);
        spawn_subscription(&state, connection, request, tx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.open_connections(), 1);

        state.registry().drain();
        state.wait_for_sessions().await;

        assert_eq!(broker.close_count(), 1);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(state.registry().session_count(), 0);
        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            kinds.push(msg.kind());
        }
        assert_eq!(kinds, vec!["connected", "subscribed"]);
    }

    #[tokio::test]
    async fn reply_to_departed_client_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        reply(&tx, ServerMessage::Pong { timestamp: 0 }).await;
        assert!(tx.is_closed());
    }

    #[test]
    fn server_error_display() {
        assert_eq!(
            GatewayServerError::BindFailed(8080, "in use".to_string()).to_string(),
            "failed to bind to port 8080: in use"
        );
    }
}
