//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Clients**: Connected WebSocket clients and requests by type
//! - **Sessions**: Lineages started, outcomes, durations and live count
//! - **Auth**: Token refreshes by result
//! - **Batches**: Batch runs
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Client gauges and counters
    describe_gauge!(
        "price_gateway_clients",
        "Number of connected WebSocket clients"
    );
    describe_counter!(
        "price_gateway_client_messages_total",
        "Total client requests by message type"
    );

    // Session metrics
    describe_counter!(
        "price_gateway_sessions_started_total",
        "Total subscription lineages started"
    );
    describe_counter!(
        "price_gateway_session_outcomes_total",
        "Total subscription lineages finished, by outcome"
    );
    describe_gauge!(
        "price_gateway_live_sessions",
        "Number of subscription lineages and batches in flight"
    );
    describe_histogram!(
        "price_gateway_session_duration_seconds",
        "Time from request to lineage outcome"
    );

    // Auth counters
    describe_counter!(
        "price_gateway_token_refreshes_total",
        "Total token refresh attempts by result"
    );

    // Batch counters
    describe_counter!("price_gateway_batches_total", "Total batch requests run");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for token refresh results.
#[derive(Debug, Clone, Copy)]
pub enum RefreshResult {
    /// New credentials obtained.
    Success,
    /// The refresh failed.
    Failure,
}

impl RefreshResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a client request.
pub fn record_client_message(message_type: &'static str) {
    counter!(
        "price_gateway_client_messages_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("price_gateway_clients").set(count as f64);
}

/// Update the in-flight lineage and batch count.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_sessions(count: usize) {
    gauge!("price_gateway_live_sessions").set(count as f64);
}

/// Record a lineage start.
pub fn record_session_started() {
    counter!("price_gateway_sessions_started_total").increment(1);
}

/// Record a lineage outcome and its duration.
pub fn record_session_outcome(outcome: &'static str, duration: Duration) {
    counter!(
        "price_gateway_session_outcomes_total",
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "price_gateway_session_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());
}

/// Record a token refresh attempt.
pub fn record_token_refresh(result: RefreshResult) {
    counter!(
        "price_gateway_token_refreshes_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record a batch run.
pub fn record_batch() {
    counter!("price_gateway_batches_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
