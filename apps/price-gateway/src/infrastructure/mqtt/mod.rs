//! MQTT Broker Adapter
//!
//! `rumqttc` implementation of the broker port, speaking MQTT 3.1.1 over a
//! secure WebSocket, plus a scripted in-process broker for tests.
//!
//! # Connection Flow
//!
//! ```text
//! connect() ──► CONNACK ──► SUBSCRIBE (QoS 1) ──► SUBACK ──► PUBLISH
//!     │            │                                │
//!     └── refused ─┴──────── BrokerEvent::Error ◄───┘
//! ```

mod client;
pub mod mock;
mod tls;

pub use client::{MqttBrokerConnector, MqttConnectorConfig};
pub use mock::MockBrokerConnector;
pub use tls::relaxed_client_config;
