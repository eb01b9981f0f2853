//! Skein Reconciler
//!
//! The reconciliation engine: one idempotent [`Reconciler::tick`] advances
//! every eligible run state machine exactly one transition, and a
//! [`Scheduler`] repeats the tick on an interval, independent of the HTTP
//! layer. The tick is safe to invoke repeatedly and concurrently; every
//! status change goes through the store's conditional claim, so overlapping
//! passes cannot dispatch the same unit twice.

mod reconciler;
mod scheduler;

pub use reconciler::{Reconciler, TickReport};
pub use scheduler::Scheduler;

use thiserror::Error;

/// Errors that abort a reconciliation tick.
///
/// Failures scoped to a single run (a command that exited non-zero, an
/// unusable input binding) never abort the tick; they fail that run and are
/// counted in the [`TickReport`].
#[derive(Debug, Error)]
pub enum ReconcileError {
  /// The run/status store failed; the tick cannot make progress.
  #[error(transparent)]
  Store(#[from] skein_store::Error),
}
