//! Client-facing WebSocket gateway.
//!
//! - `protocol`: request decoding and validation
//! - `registry`: connection → live sessions mapping
//! - `server`: axum WebSocket server and request dispatch
//! - `stats`: periodic statistics and process memory

pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use protocol::{ClientRequest, ProtocolError, decode};
pub use registry::{ConnectionId, ConnectionRegistry, SessionId};
pub use server::{GatewayServer, GatewayServerError, GatewayState, router, serve};
pub use stats::{resident_memory_bytes, run_stats_reporter};
