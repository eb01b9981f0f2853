//! Skein Server
//!
//! The HTTP+JSON boundary of the coordinating service: object endpoints for
//! every record kind, informational endpoints for settings discovery, and
//! the trigger endpoints that invoke the reconciliation tick.
//!
//! Handlers are thin: validation and identity live in the store layer, run
//! advancement lives in the reconciler. Response envelopes:
//! create/update -> 201 `{message, _id, object}` or 400 `{message}`;
//! index -> 200 `{<plural name>: [...]}`; show -> 200 object or 404
//! `{message: "Not Found"}`.

mod handlers;
mod state;

pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::handlers::*;

/// Build the API router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/api/status/", get(status))
    .route("/api/server-time/", get(server_time))
    .route("/api/filehandler-info/", get(filehandler_info))
    .route("/api/worker-info/", get(worker_info))
    .route("/api/info/", get(info_endpoint))
    .route("/api/run-tasks/", get(run_tasks))
    .route("/api/update-tasks/", get(update_tasks))
    .route(
      "/api/data-objects/",
      get(index_data_objects).post(create_data_object),
    )
    .route("/api/data-objects/{id}/", get(show_data_object).post(reject_update))
    .route("/api/file-data-objects/", get(index_file_data_objects))
    .route("/api/file-data-objects/{id}/", get(show_data_object))
    .route(
      "/api/file-data-objects/{id}/file-storage-locations/",
      get(storage_locations_by_file),
    )
    .route(
      "/api/file-data-objects/{id}/file-imports/",
      get(file_imports_by_file),
    )
    .route(
      "/api/file-storage-locations/",
      get(index_storage_locations).post(create_storage_location),
    )
    .route("/api/file-storage-locations/{id}/", get(show_storage_location))
    .route("/api/workflows/", get(index_workflows).post(create_workflow))
    .route("/api/workflows/{id}/", get(show_workflow).post(reject_update))
    .route("/api/workflow-runs/", get(index_workflow_runs))
    .route("/api/workflow-runs/{id}/", get(show_workflow_run))
    .route("/api/run-requests/", get(index_run_requests).post(create_run_request))
    .route("/api/run-requests/{id}/", get(show_run_request))
    .route("/api/task-runs/", get(index_task_runs))
    .route("/api/task-runs/{id}/", get(show_task_run))
    .route("/api/file-imports/", get(index_file_imports).post(create_file_import))
    .route("/api/file-imports/{id}/", get(show_file_import).post(update_file_import))
    .route(
      "/api/data-source-records/",
      get(index_data_source_records).post(create_data_source_record),
    )
    .route("/api/data-source-records/{id}/", get(show_data_source_record))
    .fallback(not_found_fallback)
    .with_state(state)
}

/// Serve the API until the process ends.
pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!(addr = %listener.local_addr()?, "api_listening");
  axum::serve(listener, router(state)).await
}
