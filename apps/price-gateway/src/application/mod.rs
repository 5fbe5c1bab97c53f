//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription session and batch services and the
//! port interfaces they use to reach the broker, the auth service and the
//! data stores.

/// Port interfaces for external systems (broker, auth service, stores).
pub mod ports;

/// Application services for single subscriptions and batches.
pub mod services;
