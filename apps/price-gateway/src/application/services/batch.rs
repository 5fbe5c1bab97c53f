//! Batch Orchestrator
//!
//! Fetches prices for many stock codes with shared credentials. Codes are
//! processed in fixed-size chunks; the lineages of a chunk run concurrently,
//! and the orchestrator pauses between chunks to spare the broker.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::session::{SessionContext, run_lineage};
use crate::domain::events::ServerMessage;
use crate::domain::quote::{Credentials, StockCode, SubscriptionRequest};

/// Default number of codes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default pause between chunks.
pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

/// Batch chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Codes per chunk.
    pub chunk_size: usize,
    /// Pause between chunks (not after the last).
    pub pacing: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing: DEFAULT_PACING,
        }
    }
}

/// Counters of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    /// Number of codes requested.
    pub total: usize,
    /// Codes whose lineage finished.
    pub processed: usize,
    /// Lineages that delivered a price.
    pub succeeded: usize,
    /// Lineages that did not.
    pub failed: usize,
    /// Whether the client went away before the batch finished.
    pub cancelled: bool,
}

impl BatchSummary {
    const fn progress(&self) -> ServerMessage {
        ServerMessage::BatchProgress {
            processed: self.processed,
            total: self.total,
            success: self.succeeded,
            failed: self.failed,
        }
    }

    const fn complete(&self) -> ServerMessage {
        ServerMessage::BatchComplete {
            total: self.total,
            success: self.succeeded,
            failed: self.failed,
        }
    }
}

/// Runs subscription lineages for a list of codes in paced chunks.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    ctx: SessionContext,
    config: BatchConfig,
}

impl BatchOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub const fn new(ctx: SessionContext, config: BatchConfig) -> Self {
        Self { ctx, config }
    }

    /// Fetch a price for every code.
    ///
    /// Emits `batch_start`, one `batch_progress` per chunk and
    /// `batch_complete`, interleaved with the per-session events. When
    /// `cancel` fires the batch stops between chunks and emits nothing more.
    pub async fn run(
        &self,
        codes: Vec<StockCode>,
        credentials: Credentials,
        user_id: Option<String>,
        events: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            total: codes.len(),
            ..BatchSummary::default()
        };
        let chunk_size = self.config.chunk_size.max(1);
        let chunk_count = codes.len().div_ceil(chunk_size);

        tracing::info!(
            total = summary.total,
            chunk_size,
            chunks = chunk_count,
            "Starting batch"
        );
        notify(
            &events,
            ServerMessage::BatchStart {
                total: summary.total,
            },
        )
        .await;

        for (index, chunk) in codes.chunks(chunk_size).enumerate() {
            let lineages = chunk.iter().map(|code| {
                let request =
                    SubscriptionRequest::new(code.clone(), credentials.clone(), user_id.clone());
                run_lineage(request, &self.ctx, &events, &cancel)
            });
            let reports = join_all(lineages).await;

            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let delivered = reports.iter().filter(|r| r.outcome.is_delivered()).count();
            summary.processed += chunk.len();
            summary.succeeded += delivered;
            summary.failed += chunk.len() - delivered;

            tracing::debug!(
                chunk = index + 1,
                chunks = chunk_count,
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Batch chunk finished"
            );
            notify(&events, summary.progress()).await;

            if index + 1 < chunk_count {
                tokio::select! {
                    () = cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    () = tokio::time::sleep(self.config.pacing) => {}
                }
            }
        }

        if summary.cancelled {
            tracing::info!(
                processed = summary.processed,
                total = summary.total,
                "Batch cancelled"
            );
            return summary;
        }

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch complete"
        );
        notify(&events, summary.complete()).await;
        summary
    }
}

async fn notify(events: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    let kind = message.kind();
    if events.send(message).await.is_err() {
        tracing::debug!(kind, "Client event channel closed");
    }
}
