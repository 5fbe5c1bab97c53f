#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Gateway - One-Shot MQTT Price Fetcher
//!
//! A WebSocket service that fetches the latest price for stock codes from
//! the DNSE KRX MQTT broker on behalf of clients. Each request opens its
//! own broker connection, forwards the first price and closes. Rejected
//! credentials are refreshed once through the DNSE auth API and the
//! request retried.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `quote`: Stock codes, credentials, price payloads
//!   - `session`: Session states, failures and outcomes
//!   - `events`: Messages sent to clients
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the broker, auth service and stores
//!   - `services`: Subscription sessions, retry lineage, batches
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mqtt`: rumqttc broker connector
//!   - `dnse`: Token refresher for the DNSE auth API
//!   - `persistence`: In-memory stock and account stores
//!   - `gateway`: Client WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!            subscribe          ┌──────────────┐  CONNECT/SUBSCRIBE  ┌────────────┐
//! Client ──────────────────────►│   Gateway    │────────────────────►│ DNSE MQTT  │
//!        ◄── connected,         │   session    │◄────────────────────│  broker    │
//!            subscribed,        └──────┬───────┘      PUBLISH        └────────────┘
//!            price_update              │ auth failure
//!                                      ▼
//!                               ┌──────────────┐
//!                               │  DNSE auth   │ ──► token_refreshed, retry once
//!                               └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price subscription types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::ServerMessage;
pub use domain::quote::{Credentials, PriceUpdate, StockCode, SubscriptionRequest};
pub use domain::session::{SessionError, SessionOutcome, SessionState};

// Application services
pub use application::services::{
    BatchConfig, BatchOrchestrator, SessionConfig, SessionContext, run_lineage,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig};

// Gateway server (for integration tests)
pub use infrastructure::gateway::{GatewayServer, GatewayServerError, GatewayState};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError};

// Test doubles (for integration tests)
pub use infrastructure::dnse::MockCredentialProvider;
pub use infrastructure::mqtt::MockBrokerConnector;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
