//! Domain Layer - Core price subscription types.
//!
//! Pure types with no I/O: symbol codes and credentials, the session
//! state machine vocabulary, and the events sent to clients.

/// Gateway-to-client events.
pub mod events;

/// Stock codes, credentials, requests and price payloads.
pub mod quote;

/// Session states, failures and outcomes.
pub mod session;
