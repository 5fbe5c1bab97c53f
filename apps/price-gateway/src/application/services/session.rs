//! Subscription Session Service
//!
//! Runs a one-shot price fetch for a single client request: connect to the
//! broker, subscribe to the stock topic, forward the first price, close.
//!
//! Each attempt is a [`SubscriptionSession`] that reports a tagged
//! [`SessionOutcome`]. [`run_lineage`] drives the original attempt and, when
//! the broker rejected the credentials and a refresh succeeded, exactly one
//! successor with the refreshed credentials.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BrokerConnection, BrokerConnector, BrokerEvent, ConnectOptions, CredentialProvider,
    StockRepository,
};
use crate::domain::events::{
    AUTH_REFRESH_FAILED, AUTH_RETRY_EXHAUSTED, BROKER_CONNECTED_MESSAGE, CredentialsPayload,
    ServerMessage, TOKEN_REFRESHED_MESSAGE,
};
use crate::domain::quote::{PricePayload, PriceUpdate, SubscriptionRequest};
use crate::domain::session::{SessionError, SessionOutcome, SessionState, TimeoutKind};

/// Prefix of every broker client id.
pub const CLIENT_ID_PREFIX: &str = "dnse-price-json-mqtt-ws-sub-";

/// Default time allowed between connecting and the SUBACK.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed between the SUBACK and the first price.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Deadlines applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Subscribe-ack deadline, armed when the connection is opened.
    pub ack_timeout: Duration,
    /// Data-wait deadline, armed when the SUBACK arrives.
    pub data_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    connector: Arc<dyn BrokerConnector>,
    credentials: Arc<dyn CredentialProvider>,
    stocks: Arc<dyn StockRepository>,
    config: SessionConfig,
}

impl SessionContext {
    /// Create a new session context.
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        credentials: Arc<dyn CredentialProvider>,
        stocks: Arc<dyn StockRepository>,
        config: SessionConfig,
    ) -> Self {
        Self {
            connector,
            credentials,
            stocks,
            config,
        }
    }

    /// Session deadlines.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh broker client id.
#[must_use]
pub fn generate_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}{:016x}", rand::rng().random::<u64>())
}

// =============================================================================
// Session
// =============================================================================

/// Why the connection phase of an attempt ended.
#[derive(Debug)]
enum Termination {
    Delivered(PriceUpdate),
    Deadline(TimeoutKind),
    SubscribeRejected(String),
    ConnectionFailed(String),
    Malformed(String),
    Cancelled,
}

/// What the event loop should do after handling a broker event.
enum Step {
    Continue,
    Subscribed,
    Done(Termination),
}

/// One attempt at fetching a price for a [`SubscriptionRequest`].
pub struct SubscriptionSession {
    request: SubscriptionRequest,
    ctx: SessionContext,
    events: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
    client_id: String,
    state: SessionState,
    delivered: bool,
}

impl SubscriptionSession {
    /// Create a session in the `Init` state.
    #[must_use]
    pub fn new(
        request: SubscriptionRequest,
        ctx: SessionContext,
        events: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request,
            ctx,
            events,
            cancel,
            client_id: generate_client_id(),
            state: SessionState::Init,
            delivered: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a price was forwarded.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.delivered
    }

    /// Broker client id used by this attempt.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Run the attempt to completion.
    ///
    /// The broker connection, if one was opened, is closed before this
    /// returns.
    pub async fn run(&mut self) -> SessionOutcome {
        tracing::debug!(
            code = %self.request.code(),
            retry_count = self.request.retry_count(),
            client_id = %self.client_id,
            "Starting subscription session"
        );

        let termination = self.drive().await;
        let outcome = self.finish(termination).await;

        tracing::debug!(
            code = %self.request.code(),
            outcome = outcome.label(),
            "Subscription session finished"
        );
        outcome
    }

    /// Connection phase: returns once the connection is closed (or was never
    /// opened).
    async fn drive(&mut self) -> Termination {
        let topic = self.request.topic();
        let options = ConnectOptions {
            client_id: self.client_id.clone(),
            credentials: self.request.credentials().clone(),
        };

        self.transition(SessionState::Connecting);
        let deadline = tokio::time::sleep(self.ctx.config.ack_timeout);
        tokio::pin!(deadline);
        let mut armed = TimeoutKind::SubscribeAck;

        let connector = Arc::clone(&self.ctx.connector);
        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Termination::Cancelled,
            () = &mut deadline => return Termination::Deadline(armed),
            result = connector.connect(options) => result,
        };
        let mut conn = match connected {
            Ok(conn) => conn,
            Err(e) => return Termination::ConnectionFailed(e.to_string()),
        };

        let termination = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Termination::Cancelled,
                () = &mut deadline => break Termination::Deadline(armed),
                event = conn.next_event() => {
                    match self.on_event(event, conn.as_mut(), &topic).await {
                        Step::Continue => {}
                        Step::Subscribed => {
                            deadline
                                .as_mut()
                                .reset(Instant::now() + self.ctx.config.data_timeout);
                            armed = TimeoutKind::Data;
                        }
                        Step::Done(termination) => break termination,
                    }
                }
            }
        };

        if matches!(termination, Termination::Cancelled)
            && matches!(
                self.state,
                SessionState::Subscribing | SessionState::AwaitingData
            )
        {
            conn.unsubscribe(&topic).await;
        }
        conn.close().await;

        termination
    }

    async fn on_event(
        &mut self,
        event: BrokerEvent,
        conn: &mut dyn BrokerConnection,
        topic: &str,
    ) -> Step {
        match event {
            BrokerEvent::ConnAck => {
                if self.state != SessionState::Connecting {
                    return Step::Continue;
                }
                if let Err(e) = conn.subscribe(topic).await {
                    return Step::Done(Termination::ConnectionFailed(e.to_string()));
                }
                self.transition(SessionState::Subscribing);
                self.emit(ServerMessage::Connected {
                    code: Some(self.request.code().to_string()),
                    message: BROKER_CONNECTED_MESSAGE.to_string(),
                    version: None,
                })
                .await;
                Step::Continue
            }
            BrokerEvent::SubAck(ack) if self.state == SessionState::Subscribing => match ack {
                Ok(()) => {
                    self.transition(SessionState::AwaitingData);
                    self.emit(ServerMessage::Subscribed {
                        code: self.request.code().to_string(),
                        topic: topic.to_string(),
                    })
                    .await;
                    Step::Subscribed
                }
                Err(reason) => Step::Done(Termination::SubscribeRejected(reason)),
            },
            BrokerEvent::SubAck(_) => Step::Continue,
            BrokerEvent::Message { payload, .. } => {
                if self.delivered
                    || !matches!(
                        self.state,
                        SessionState::Subscribing | SessionState::AwaitingData
                    )
                {
                    return Step::Continue;
                }
                let update = PricePayload::parse(&payload)
                    .map_err(|e| e.to_string())
                    .and_then(|parsed| {
                        PriceUpdate::from_payload(&parsed, Utc::now()).map_err(|e| e.to_string())
                    });
                match update {
                    Ok(update) => {
                        self.delivered = true;
                        Step::Done(Termination::Delivered(update))
                    }
                    Err(detail) => Step::Done(Termination::Malformed(detail)),
                }
            }
            BrokerEvent::Error(message) => Step::Done(Termination::ConnectionFailed(message)),
            BrokerEvent::Closed => {
                Step::Done(Termination::ConnectionFailed("Connection closed".to_string()))
            }
        }
    }

    /// Terminal phase: emit the client event and pick the outcome.
    async fn finish(&mut self, termination: Termination) -> SessionOutcome {
        let code = self.request.code().to_string();

        match termination {
            Termination::Delivered(update) => {
                self.transition(SessionState::Delivered);
                self.emit(ServerMessage::PriceUpdate {
                    code: code.clone(),
                    data: update.clone(),
                })
                .await;
                self.store_price(&code, &update).await;
                SessionOutcome::Delivered
            }
            Termination::Deadline(TimeoutKind::SubscribeAck) => {
                tracing::warn!(code = %code, "Subscribe ack timed out");
                self.transition(SessionState::TimedOut);
                self.emit(ServerMessage::session_error(
                    &code,
                    SessionError::AckTimeout.to_string(),
                ))
                .await;
                SessionOutcome::TimedOut(TimeoutKind::SubscribeAck)
            }
            Termination::Deadline(TimeoutKind::Data) => {
                tracing::info!(code = %code, "No data received before deadline");
                self.transition(SessionState::TimedOut);
                self.emit(ServerMessage::Timeout {
                    code,
                    message: SessionError::DataTimeout.to_string(),
                })
                .await;
                SessionOutcome::TimedOut(TimeoutKind::Data)
            }
            Termination::SubscribeRejected(reason) => {
                tracing::warn!(code = %code, reason = %reason, "Subscription rejected");
                self.transition(SessionState::Errored);
                self.emit(ServerMessage::session_error(&code, reason.clone()))
                    .await;
                SessionOutcome::Errored(SessionError::SubscribeRejected(reason))
            }
            Termination::Malformed(detail) => {
                let error = SessionError::MalformedPayload(detail);
                tracing::warn!(code = %code, error = %error, "Malformed price payload");
                self.transition(SessionState::Errored);
                self.emit(ServerMessage::session_error(&code, error.to_string()))
                    .await;
                SessionOutcome::Errored(error)
            }
            Termination::ConnectionFailed(message) => {
                match SessionError::from_connection_error(message) {
                    error @ SessionError::AuthSignature(_) => self.on_auth_failure(error).await,
                    error => {
                        tracing::warn!(code = %code, error = %error, "Broker connection error");
                        self.transition(SessionState::Errored);
                        self.emit(ServerMessage::session_error(&code, error.to_string()))
                            .await;
                        SessionOutcome::Errored(error)
                    }
                }
            }
            Termination::Cancelled => {
                tracing::debug!(code = %code, "Session cancelled by client");
                self.transition(SessionState::Cancelled);
                SessionOutcome::Cancelled
            }
        }
    }

    async fn on_auth_failure(&mut self, error: SessionError) -> SessionOutcome {
        let code = self.request.code().to_string();

        if !self.request.can_retry() {
            tracing::warn!(
                code = %code,
                retry_count = self.request.retry_count(),
                "Authentication failed after token refresh"
            );
            self.transition(SessionState::AuthFailed);
            self.emit(ServerMessage::AuthError {
                code,
                error: AUTH_RETRY_EXHAUSTED.to_string(),
            })
            .await;
            return SessionOutcome::AuthFailed(error);
        }

        tracing::info!(code = %code, "Authentication failed, refreshing token");
        self.transition(SessionState::AuthRetrying);

        let provider = Arc::clone(&self.ctx.credentials);
        let refreshed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.transition(SessionState::Cancelled);
                return SessionOutcome::Cancelled;
            }
            result = provider.refresh() => result,
        };

        match refreshed {
            Ok(credentials) => {
                tracing::info!(code = %code, "Token refreshed, retrying subscription");
                self.emit(ServerMessage::TokenRefreshed {
                    code,
                    message: TOKEN_REFRESHED_MESSAGE.to_string(),
                    new_credentials: CredentialsPayload::from(&credentials),
                })
                .await;
                SessionOutcome::RetryWith(credentials)
            }
            Err(e) => {
                tracing::error!(code = %code, error = %e, "Token refresh failed");
                self.transition(SessionState::AuthFailed);
                self.emit(ServerMessage::AuthError {
                    code,
                    error: AUTH_REFRESH_FAILED.to_string(),
                })
                .await;
                SessionOutcome::AuthFailed(SessionError::RefreshFailed(e.to_string()))
            }
        }
    }

    async fn store_price(&self, code: &str, update: &PriceUpdate) {
        match self.ctx.stocks.update_price(code, update).await {
            Ok(true) => tracing::debug!(code, "Stock record updated"),
            Ok(false) => tracing::debug!(code, "No stock record to update"),
            Err(e) => tracing::warn!(code, error = %e, "Failed to update stock record"),
        }
    }

    /// Send an event to the client unless it has gone away.
    async fn emit(&self, message: ServerMessage) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            result = self.events.send(message) => {
                if result.is_err() {
                    tracing::debug!(code = %self.request.code(), "Client event channel closed");
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            code = %self.request.code(),
            from = self.state.as_str(),
            to = next.as_str(),
            "Session state change"
        );
        self.state = next;
    }
}

// =============================================================================
// Lineage Driver
// =============================================================================

/// Result of a subscription lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageReport {
    /// Outcome of the last attempt.
    pub outcome: SessionOutcome,
    /// Number of attempts made (1 or 2).
    pub attempts: u8,
}

/// Run a request and at most one auth-triggered retry.
///
/// Only a [`SessionOutcome::RetryWith`] from an attempt that may still retry
/// starts a successor; every other outcome ends the lineage.
pub async fn run_lineage(
    request: SubscriptionRequest,
    ctx: &SessionContext,
    events: &mpsc::Sender<ServerMessage>,
    cancel: &CancellationToken,
) -> LineageReport {
    let mut current = request;
    let mut attempts: u8 = 0;

    loop {
        attempts += 1;
        let outcome = SubscriptionSession::new(
            current.clone(),
            ctx.clone(),
            events.clone(),
            cancel.clone(),
        )
        .run()
        .await;

        match outcome {
            SessionOutcome::RetryWith(credentials) if current.can_retry() => {
                current = current.retry_with(credentials);
            }
            outcome => return LineageReport { outcome, attempts },
        }
    }
}
