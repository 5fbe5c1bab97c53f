//! Periodic gateway statistics.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::server::GatewayState;

/// Shortest accepted reporting interval.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Resident set size of this process in bytes.
///
/// Returns `None` where `/proc/self/status` is unavailable.
#[must_use]
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let kib = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .split_whitespace()
        .next()?
        .parse::<u64>()
        .ok()?;
    Some(kib * 1024)
}

/// Log connection, session and memory figures every `interval` until
/// cancelled.
pub async fn run_stats_reporter(
    state: Arc<GatewayState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tracing::info!(
                    connections = state.registry().connection_count(),
                    live_sessions = state.registry().session_count(),
                    rss_bytes = resident_memory_bytes(),
                    uptime_secs = state.uptime().as_secs(),
                    "Gateway stats"
                );
            }
        }
    }

    tracing::debug!("Stats reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_rss_line() {
        let status = "Name:\tprice-gateway\nVmPeak:\t  20000 kB\nVmRSS:\t   12345 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(12345 * 1024));
    }

    #[test]
    fn missing_vm_rss_is_none() {
        assert_eq!(parse_vm_rss("Name:\tprice-gateway\n"), None);
        assert_eq!(parse_vm_rss("VmRSS:\tlots kB\n"), None);
    }
}
