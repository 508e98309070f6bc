//! Ingestion scheduler.
//!
//! Drives the polling loop: each tick runs one ingestion cycle per
//! configured location, in order, to completion. The first tick fires
//! immediately so a freshly started service has data without waiting a
//! full interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::{self, MissedTickBehavior};

use crate::ingest::pipeline::{CycleReport, IngestionPipeline};

/// Run the polling loop until `Ctrl+C` (SIGINT) is received.
///
/// Per-location failures are contained in the pipeline, so a bad tick
/// never stops the loop.
pub async fn run_ingestion(
    pipeline: Arc<IngestionPipeline>,
    locations: Vec<String>,
    poll_interval_seconds: u64,
) {
    let mut interval = time::interval(Duration::from_secs(poll_interval_seconds));
    // A slow tick pushes the next one back instead of bursting to catch up.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Ingestion started for {} location(s) (interval: {}s)",
        locations.len(),
        poll_interval_seconds
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_all_locations(&pipeline, &locations).await;
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping ingestion.");
                break;
            }
        }
    }

    tracing::info!("Ingestion stopped cleanly");
}

/// One tick: a cycle for every location, sequentially.
pub async fn run_all_locations(
    pipeline: &IngestionPipeline,
    locations: &[String],
) -> Vec<CycleReport> {
    let mut reports = Vec::with_capacity(locations.len());
    for location in locations {
        reports.push(pipeline.run_cycle(location).await);
    }

    let stored: usize = reports.iter().map(|r| r.stored).sum();
    let notified: usize = reports.iter().map(|r| r.notified).sum();
    tracing::info!(
        "Tick complete: {} new incident(s), {} notification(s) across {} location(s)",
        stored,
        notified,
        locations.len()
    );

    reports
}
