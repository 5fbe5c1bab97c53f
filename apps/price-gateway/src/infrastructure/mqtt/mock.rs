//! Scripted in-process broker for testing.
//!
//! Connections are accepted unless the password (investor token) was
//! rejected. A subscription is acknowledged and, when a payload is
//! configured for the topic's code, followed by that payload. Every
//! connect, subscribe, unsubscribe and close is recorded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    BrokerConnection, BrokerConnector, BrokerEvent, ConnectOptions, TransportError,
};
use crate::domain::quote::TOPIC_PREFIX;

#[derive(Debug, Default)]
struct MockBrokerState {
    prices: HashMap<String, Vec<u8>>,
    duplicates: usize,
    rejected_tokens: HashMap<String, String>,
    rejected_codes: HashMap<String, String>,
    rejected_grants: HashMap<(String, String), String>,
    silent_codes: HashSet<String>,
    connect_error: Option<String>,
    connections: Vec<ConnectOptions>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    closes: usize,
    open: usize,
    max_open: usize,
}

/// Mock broker connector for testing.
#[derive(Debug, Clone, Default)]
pub struct MockBrokerConnector {
    state: Arc<Mutex<MockBrokerState>>,
}

impl MockBrokerConnector {
    /// Create a broker that accepts everything and publishes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` after a subscription to `code`.
    #[must_use]
    pub fn with_price(self, code: &str, payload: impl Into<Vec<u8>>) -> Self {
        self.state
            .lock()
            .prices
            .insert(code.to_string(), payload.into());
        self
    }

    /// Publish every payload `extra` more times.
    #[must_use]
    pub fn with_duplicates(self, extra: usize) -> Self {
        self.state.lock().duplicates = extra;
        self
    }

    /// Refuse connections using `token` with a connection error.
    #[must_use]
    pub fn reject_token(self, token: &str, message: &str) -> Self {
        self.state
            .lock()
            .rejected_tokens
            .insert(token.to_string(), message.to_string());
        self
    }

    /// Drop connections using `token` with an error once they subscribe to
    /// `code`.
    #[must_use]
    pub fn reject_token_for(self, code: &str, token: &str, message: &str) -> Self {
        self.state.lock().rejected_grants.insert(
            (code.to_string(), token.to_string()),
            message.to_string(),
        );
        self
    }

    /// Answer subscriptions to `code` with a failed SUBACK.
    #[must_use]
    pub fn reject_subscription(self, code: &str, reason: &str) -> Self {
        self.state
            .lock()
            .rejected_codes
            .insert(code.to_string(), reason.to_string());
        self
    }

    /// Never acknowledge subscriptions to `code`.
    #[must_use]
    pub fn without_suback(self, code: &str) -> Self {
        self.state.lock().silent_codes.insert(code.to_string());
        self
    }

    /// Fail every `connect` call.
    #[must_use]
    pub fn fail_connect(self, message: &str) -> Self {
        self.state.lock().connect_error = Some(message.to_string());
        self
    }

    /// Options of every connection opened so far.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectOptions> {
        self.state.lock().connections.clone()
    }

    /// Number of connections opened.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Topics subscribed so far.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Topics unsubscribed so far.
    #[must_use]
    pub fn unsubscriptions(&self) -> Vec<String> {
        self.state.lock().unsubscriptions.clone()
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    /// Highest number of simultaneously open connections.
    #[must_use]
    pub fn max_open_connections(&self) -> usize {
        self.state.lock().max_open
    }
}

#[async_trait]
impl BrokerConnector for MockBrokerConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.connect_error {
            return Err(TransportError::Connect(message.clone()));
        }

        let token = options.credentials.investor_token().to_string();
        let first = state
            .rejected_tokens
            .get(options.credentials.investor_token())
            .map_or(BrokerEvent::ConnAck, |message| {
                BrokerEvent::Error(message.clone())
            });

        state.connections.push(options);
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        drop(state);

        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            token,
            queue: VecDeque::from([first]),
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<MockBrokerState>>,
    token: String,
    queue: VecDeque<BrokerEvent>,
    closed: bool,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.subscriptions.push(topic.to_string());

        let code = topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic);
        let grant = (code.to_string(), self.token.clone());
        if let Some(message) = state.rejected_grants.get(&grant) {
            self.queue.push_back(BrokerEvent::Error(message.clone()));
            return Ok(());
        }
        if state.silent_codes.contains(code) {
            return Ok(());
        }
        if let Some(reason) = state.rejected_codes.get(code) {
            self.queue.push_back(BrokerEvent::SubAck(Err(reason.clone())));
            return Ok(());
        }

        self.queue.push_back(BrokerEvent::SubAck(Ok(())));
        if let Some(payload) = state.prices.get(code) {
            for _ in 0..=state.duplicates {
                self.queue.push_back(BrokerEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> BrokerEvent {
        match self.queue.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn unsubscribe(&mut self, topic: &str) {
        self.state.lock().unsubscriptions.push(topic.to_string());
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        state.closes += 1;
        if !self.closed {
            state.open = state.open.saturating_sub(1);
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quote::{Credentials, topic_for};

    fn options(token: &str) -> ConnectOptions {
        ConnectOptions {
            client_id: "c1".to_string(),
            credentials: Credentials::new(token, "i1"),
        }
    }

    #[tokio::test]
    async fn scripted_subscription_flow() {
        let broker = MockBrokerConnector::new()
            .with_price("VIC", "{}")
            .with_duplicates(1);
        let mut conn = broker.connect(options("t1")).await.unwrap();

        assert_eq!(conn.next_event().await, BrokerEvent::ConnAck);
        conn.subscribe(&topic_for("VIC")).await.unwrap();
        assert_eq!(conn.next_event().await, BrokerEvent::SubAck(Ok(())));
        assert!(matches!(conn.next_event().await, BrokerEvent::Message { .. }));
        assert!(matches!(conn.next_event().await, BrokerEvent::Message { .. }));

        conn.close().await;
        assert_eq!(broker.close_count(), 1);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.subscriptions(), vec![topic_for("VIC")]);
    }

    #[tokio::test]
    async fn drained_queue_waits_forever() {
        let broker = MockBrokerConnector::new();
        let mut conn = broker.connect(options("t1")).await.unwrap();
        assert_eq!(conn.next_event().await, BrokerEvent::ConnAck);

        let mut next = tokio_test::task::spawn(conn.next_event());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn rejected_token_yields_error() {
        let broker = MockBrokerConnector::new().reject_token("bad", "Not authorized");
        let mut conn = broker.connect(options("bad")).await.unwrap();
        assert_eq!(
            conn.next_event().await,
            BrokerEvent::Error("Not authorized".to_string())
        );
    }

    #[tokio::test]
    async fn token_rejected_for_one_code_only() {
        let broker = MockBrokerConnector::new().reject_token_for("VIC", "t1", "Not authorized");

        let mut conn = broker.connect(options("t1")).await.unwrap();
        assert_eq!(conn.next_event().await, BrokerEvent::ConnAck);
        conn.subscribe(&topic_for("VIC")).await.unwrap();
        assert_eq!(
            conn.next_event().await,
            BrokerEvent::Error("Not authorized".to_string())
        );

        let mut other = broker.connect(options("t1")).await.unwrap();
        other.next_event().await;
        other.subscribe(&topic_for("HPG")).await.unwrap();
        assert_eq!(other.next_event().await, BrokerEvent::SubAck(Ok(())));

        let mut refreshed = broker.connect(options("t2")).await.unwrap();
        refreshed.next_event().await;
        refreshed.subscribe(&topic_for("VIC")).await.unwrap();
        assert_eq!(refreshed.next_event().await, BrokerEvent::SubAck(Ok(())));
    }

    #[tokio::test]
    async fn rejected_subscription_yields_failed_suback() {
        let broker = MockBrokerConnector::new().reject_subscription("VIC", "nope");
        let mut conn = broker.connect(options("t1")).await.unwrap();
        conn.next_event().await;
        conn.subscribe(&topic_for("VIC")).await.unwrap();
        assert_eq!(
            conn.next_event().await,
            BrokerEvent::SubAck(Err("nope".to_string()))
        );
    }
}
