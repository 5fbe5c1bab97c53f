//! Price Gateway Binary
//!
//! Starts the WebSocket price gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `WSS_PORT`: WebSocket listener port (default: 8080)
//! - `GATEWAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `BROKER_HOST` / `BROKER_PORT` / `BROKER_PATH`: MQTT broker endpoint
//!   (default: datafeed-lts-krx.dnse.com.vn, 443, /wss)
//! - `DNSE_USERNAME` / `DNSE_PASSWORD`: Account used for token refresh
//!   (refresh disabled when either is missing)
//! - `DNSE_AUTH_URL`: Token refresh endpoint
//! - `TARGET_USER_ID`: Account record that receives refreshed tokens
//! - `SESSION_ACK_TIMEOUT_SECS`: Subscribe acknowledgment deadline (default: 10)
//! - `SESSION_DATA_TIMEOUT_SECS`: First price deadline (default: 5)
//! - `BATCH_CHUNK_SIZE`: Codes per batch chunk (default: 10)
//! - `BATCH_PACING_MS`: Pause between batch chunks (default: 2000)
//! - `STATS_INTERVAL_SECS`: Statistics log interval (default: 60)
//! - `DEBUG`: Verbose per-session logging (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_gateway::infrastructure::dnse::{DnseCredentialRefresher, DnseRefresherConfig};
use price_gateway::infrastructure::gateway::run_stats_reporter;
use price_gateway::infrastructure::mqtt::{MqttBrokerConnector, MqttConnectorConfig};
use price_gateway::infrastructure::persistence::{
    InMemoryAccountRepository, InMemoryStockRepository,
};
use price_gateway::infrastructure::telemetry;
use price_gateway::{
    GatewayConfig, GatewayServer, GatewayState, HealthServer, SessionContext, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        trace_export = telemetry_guard.is_exporting(),
        "Starting Price Gateway"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Stores
    let stocks = Arc::new(InMemoryStockRepository::upserting());
    let accounts = Arc::new(InMemoryAccountRepository::upserting());

    // Upstream adapters
    let connector = MqttBrokerConnector::new(MqttConnectorConfig::from_settings(&config.broker))?;
    let refresher = DnseCredentialRefresher::new(DnseRefresherConfig::from(&config.auth), accounts)?;

    let sessions = SessionContext::new(
        Arc::new(connector),
        Arc::new(refresher),
        stocks,
        config.session,
    );
    let state = Arc::new(GatewayState::new(
        sessions,
        config.batch,
        env!("CARGO_PKG_VERSION"),
        shutdown_token.clone(),
    ));

    // Spawn health server
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::clone(&state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn stats reporter
    tokio::spawn(run_stats_reporter(
        Arc::clone(&state),
        config.stats_interval,
        shutdown_token.clone(),
    ));

    // Spawn WebSocket server
    let gateway_server = GatewayServer::new(config.server.wss_port, Arc::clone(&state));
    let gateway_shutdown = shutdown_token.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
            gateway_shutdown.cancel();
        }
    });

    tracing::info!("Price gateway ready");

    await_shutdown(shutdown_token).await;

    let drained = state.registry().drain();
    tracing::info!(connections = drained, "Cancelled client sessions");

    let stopped = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Err(e) = gateway_handle.await {
            tracing::error!(error = %e, "WebSocket server task failed");
        }
        state.wait_for_sessions().await;
    })
    .await;
    if stopped.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Sessions did not close in time"
        );
    }

    tracing::info!("Price gateway stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        wss_port = config.server.wss_port,
        health_port = config.server.health_port,
        broker_url = %config.broker.url(),
        auto_refresh = config.auth.refresh_enabled(),
        debug = config.debug,
        "Configuration loaded"
    );
    tracing::debug!(
        ack_timeout_secs = config.session.ack_timeout.as_secs(),
        data_timeout_secs = config.session.data_timeout.as_secs(),
        chunk_size = config.batch.chunk_size,
        pacing_ms = u64::try_from(config.batch.pacing.as_millis()).unwrap_or(u64::MAX),
        auth_url = %config.auth.url,
        account = ?config.auth.account,
        target_user_id = ?config.auth.target_user_id,
        "Session settings"
    );
    if !config.auth.refresh_enabled() {
        tracing::warn!("DNSE_USERNAME/DNSE_PASSWORD not set, automatic token refresh disabled");
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an early cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server stopped, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
