//! The scheduler: a repeating reconciliation tick.
//!
//! Owns dispatch timing so that backend latency never couples to the HTTP
//! request path. The HTTP trigger endpoints invoke the same tick function;
//! overlap is safe because the tick itself is idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Reconciler;

/// Repeats the reconciliation tick on a fixed interval until cancelled.
pub struct Scheduler {
  reconciler: Arc<Reconciler>,
  interval: Duration,
}

impl Scheduler {
  pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
    Self {
      reconciler,
      interval,
    }
  }

  /// Run the tick loop. Blocks until the cancellation token fires.
  pub async fn run(self, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = self.interval.as_millis() as u64, "scheduler_started");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("scheduler_stopped");
          break;
        }
        _ = ticker.tick() => {
          match self.reconciler.tick().await {
            Ok(report) if !report.is_quiet() => {
              info!(
                dispatched = report.tasks_dispatched,
                completed = report.tasks_completed,
                failed = report.tasks_failed,
                workflow_runs_completed = report.workflow_runs_completed,
                workflow_runs_failed = report.workflow_runs_failed,
                "reconcile_advanced"
              );
            }
            Ok(_) => {}
            Err(e) => {
              // The next tick retries from a clean scan.
              error!(error = %e, "reconcile_tick_failed");
            }
          }
        }
      }
    }
  }
}
