//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// DNSE auth API credential refresher.
pub mod dnse;

/// Client-facing WebSocket gateway.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// MQTT broker connector (rumqttc over secure WebSocket).
pub mod mqtt;

/// In-memory stock and account stores.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
