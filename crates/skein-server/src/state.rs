use std::sync::Arc;

use skein_model::{FileHandlerSettings, WorkerSettings};
use skein_reconciler::Reconciler;
use skein_store::Store;

/// Shared state behind every request handler.
///
/// Handlers share no mutable request state; everything mutable lives behind
/// the store's own synchronization.
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub reconciler: Arc<Reconciler>,
  pub filehandler_settings: FileHandlerSettings,
  pub worker_settings: WorkerSettings,
  pub version: String,
}
