//! Configuration Module
//!
//! Configuration loading for the gateway service.

mod settings;

pub use settings::{
    AccountSecret, AuthSettings, BrokerSettings, ConfigError, GatewayConfig, ServerSettings,
};
