use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::orchestrator::Orchestrator;

/// Reason recorded on bookings closed by the completion sweep.
pub const STAY_ENDED: &str = "stay ended";

/// One completion pass: every confirmed booking whose window ended on or
/// before today moves to completed. Returns how many were moved.
pub async fn complete_finished(orchestrator: &Orchestrator, engine: &Engine) -> usize {
    let today = orchestrator.clock().today();
    let mut completed = 0;
    for booking_id in engine.collect_finished(today) {
        match orchestrator.complete(&booking_id, Some(STAY_ENDED.into())).await {
            Ok(_) => completed += 1,
            Err(e) => {
                // May have been cancelled or completed concurrently
                debug!("completer skip {booking_id}: {e}");
            }
        }
    }
    completed
}

/// Background task that periodically completes finished stays.
pub async fn run_completer(orchestrator: Arc<Orchestrator>, engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let n = complete_finished(&orchestrator, &engine).await;
        if n > 0 {
            info!("completed {n} finished bookings");
        }
    }
}

/// Background task that periodically repairs drift in the per-date ledgers.
pub async fn run_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; nothing can have drifted yet
    interval.tick().await;
    loop {
        interval.tick().await;
        let repaired = engine.reconcile().await;
        if repaired > 0 {
            info!("reconciliation repaired {repaired} resources");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            error!("WAL compaction failed: {e}");
        }
    }
}
