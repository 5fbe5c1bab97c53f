//! Broker Port (Driven Port)
//!
//! Interface for opening a subscription connection to the price broker.
//! An adapter turns its client's packet stream into [`BrokerEvent`]s so the
//! session state machine never sees protocol types.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::quote::Credentials;

/// Parameters for one broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Client identifier, unique per attempt.
    pub client_id: String,
    /// Username (investor id) and password (investor token).
    pub credentials: Credentials,
}

/// Everything a session needs to know about its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The broker accepted the connection.
    ConnAck,
    /// The broker answered the subscribe request; `Err` carries the reason.
    SubAck(Result<(), String>),
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },
    /// Connection-level error, including broker refusals.
    Error(String),
    /// The connection ended without an error.
    Closed,
}

/// Errors raised while talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be set up.
    #[error("{0}")]
    Connect(String),

    /// A request could not be queued on the connection.
    #[error("{0}")]
    Request(String),
}

/// Factory for broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Start connecting with the given options.
    ///
    /// Returns once the connection is in flight; the CONNACK (or the refusal)
    /// arrives later through [`BrokerConnection::next_event`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the connection cannot be started.
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// One live broker connection, owned by exactly one session.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Send a subscribe request for `topic` (QoS 1).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the request cannot be queued.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Wait for the next connection event.
    async fn next_event(&mut self) -> BrokerEvent;

    /// Best-effort unsubscribe from `topic`.
    async fn unsubscribe(&mut self, topic: &str);

    /// Close the connection. Called exactly once per connection.
    async fn close(&mut self);
}
