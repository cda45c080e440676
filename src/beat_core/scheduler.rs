//! Periodic poll loop

use super::runner::QueryRunner;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Pass counters reported when the loop stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerReport {
    pub passes_ok: u64,
    pub passes_failed: u64,
}

/// Run one pass per period until `stop` flips to `true` or its sender is dropped
///
/// The first pass runs one full period after start. A pass that overruns the
/// period causes the missed ticks to be skipped, never queued. The stop signal
/// is only observed between passes, so a pass in flight always completes.
pub async fn run_scheduler(
    mut runner: QueryRunner,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> SchedulerReport {
    log::info!(
        "⏰ Starting poll scheduler ({} queries, period: {:?})",
        runner.queries().len(),
        period
    );

    let mut report = SchedulerReport::default();
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer.tick().await; // Skip first immediate tick

    if *stop.borrow() {
        log::info!("🛑 Poll scheduler stopped before first pass");
        return report;
    }

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = timer.tick() => {
                match runner.run_pass().await {
                    Ok(_) => report.passes_ok += 1,
                    Err(e) => {
                        report.passes_failed += 1;
                        log::error!("❌ Poll pass failed: {}", e);
                    }
                }
            }
        }
    }

    log::info!(
        "🛑 Poll scheduler stopped after {} passes ({} failed)",
        report.passes_ok + report.passes_failed,
        report.passes_failed
    );

    report
}
