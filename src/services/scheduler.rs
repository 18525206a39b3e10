//! Drives ingestion cycles on a fixed interval until shutdown.

use crate::services::ingest::IngestCycle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs one cycle at a time: a cycle is awaited to completion (or
/// cancellation) before the interval sleep starts, so cycles never overlap.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    /// When false, a single cycle is run and `run` returns.
    watch_for_new_files: bool,
}

impl Scheduler {
    pub fn new(interval: Duration, watch_for_new_files: bool) -> Self {
        Self {
            interval,
            watch_for_new_files,
        }
    }

    /// Returns the number of cycles that were started.
    pub async fn run(&self, cycle: &mut IngestCycle, cancel: &CancellationToken) -> usize {
        let mut started = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            started += 1;
            match cycle.run_once(cancel).await {
                Ok(summary) => info!(
                    "cycle finished: {} listed, {} new, {} ingested, {} failed, {} records",
                    summary.listed,
                    summary.candidates,
                    summary.processed,
                    summary.failed,
                    summary.records
                ),
                // Listing or staging trouble: try again next interval.
                Err(err) => error!("cycle failed: {}", err),
            }

            if !self.watch_for_new_files {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("ingestion stopped after {} cycles", started);
        started
    }
}
