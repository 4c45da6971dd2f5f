use crate::error::Error;
use crate::log::SWEEP;
use crate::Ward;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub missed: usize,
    pub completed: usize,
}

///
/// Marks overdue slots MISSED, then completes orders whose end has passed.
///
/// Slots are swept first so that doses due before an order ended are still recorded as missed.
///
pub async fn run_once(ward: &Ward, now: DateTime<Utc>) -> Result<SweepReport, Error> {
    let missed = ward.tracker.sweep_missed(now).await?;
    let completed = ward.orders.complete_due_orders(now).await?.len();

    let report = SweepReport { missed, completed };

    if missed > 0 || completed > 0 {
        info!(target: SWEEP, msg = "Sweep", missed, completed);
    } else {
        debug!(target: SWEEP, msg = "Sweep", missed, completed);
    }

    Ok(report)
}

///
/// Runs `run_once` every `interval` on the tracker until `shutdown` is cancelled.
/// A failed sweep is logged and retried on the next tick.
///
pub fn spawn(ward: Ward, interval: Duration, tracker: &TaskTracker, shutdown: CancellationToken) {
    tracker.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(target: SWEEP, msg = "Sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = run_once(&ward, Utc::now()).await {
                        error!(target: SWEEP, msg = "Sweep failed", error = err.to_string());
                    }
                }
            }
        }
    });
}
