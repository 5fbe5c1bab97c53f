//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionSession` / `run_lineage`: one-shot price fetch with a
//!   single auth-triggered retry
//! - `BatchOrchestrator`: chunked, paced fan-out of lineages

pub mod batch;
pub mod session;

pub use batch::{BatchConfig, BatchOrchestrator, BatchSummary};
pub use session::{
    LineageReport, SessionConfig, SessionContext, SubscriptionSession, generate_client_id,
    run_lineage,
};
