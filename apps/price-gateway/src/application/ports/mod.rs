//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerConnector`: Opens MQTT connections to the price broker
//! - `CredentialProvider`: Obtains fresh broker credentials
//! - `StockRepository`: Persists the latest price per stock code
//! - `AccountRepository`: Persists refreshed tokens per account

mod broker_port;
mod credential_port;
mod store_port;

pub use broker_port::{
    BrokerConnection, BrokerConnector, BrokerEvent, ConnectOptions, TransportError,
};
pub use credential_port::{CredentialProvider, RefreshError};
pub use store_port::{AccountRepository, StockRepository, StoreError};
