//! Route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use skein_model::{
  DataObject, DataObjectKind, DataSourceRecord, FileImport, RunRequest, StorageLocation,
  Stored, Workflow, WorkflowRun,
};
use skein_store::{Error as StoreError, Kind, ObjectStore};

use crate::state::AppState;

#[derive(Deserialize)]
pub(crate) struct IndexQuery {
  q: Option<String>,
}

fn reply(status: StatusCode, body: Value) -> Response {
  (status, Json(body)).into_response()
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
  reply(status, json!({ "message": text.into() }))
}

fn not_found() -> Response {
  message(StatusCode::NOT_FOUND, "Not Found")
}

/// Map store failures: validation is the caller's fault, the rest is ours.
fn store_error(e: StoreError) -> Response {
  match e {
    StoreError::Invalid(validation) => message(StatusCode::BAD_REQUEST, validation.to_string()),
    other => {
      error!(error = %other, "store_error");
      message(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
    }
  }
}

fn created(kind: Kind, id: &str, object: Value) -> Response {
  reply(
    StatusCode::CREATED,
    json!({
      "message": format!("created {}", kind.key()),
      "_id": id,
      "object": object,
    }),
  )
}

fn stored<T: serde::Serialize>(id: String, object: T) -> Value {
  serde_json::to_value(Stored { id, object }).unwrap_or(Value::Null)
}

fn index<T: serde::Serialize>(kind: Kind, items: Vec<Stored<T>>) -> Response {
  reply(StatusCode::OK, json!({ kind.plural(): items }))
}

fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, Response> {
  serde_json::from_value(body).map_err(|e| message(StatusCode::BAD_REQUEST, e.to_string()))
}

// ---- informational ----

pub(crate) async fn status() -> Response {
  message(StatusCode::OK, "server is up")
}

pub(crate) async fn server_time() -> Response {
  reply(StatusCode::OK, json!({ "time": Utc::now() }))
}

pub(crate) async fn filehandler_info(State(state): State<Arc<AppState>>) -> Response {
  reply(
    StatusCode::OK,
    json!({ "file_handler_info": state.filehandler_settings }),
  )
}

pub(crate) async fn worker_info(State(state): State<Arc<AppState>>) -> Response {
  reply(StatusCode::OK, json!({ "worker_info": state.worker_settings }))
}

pub(crate) async fn info_endpoint(State(state): State<Arc<AppState>>) -> Response {
  reply(StatusCode::OK, json!({ "version": state.version }))
}

// ---- reconciliation triggers ----

async fn trigger_tick(state: Arc<AppState>) -> Response {
  match state.reconciler.tick().await {
    Ok(_) => reply(StatusCode::OK, json!({ "status": "ok" })),
    Err(e) => {
      error!(error = %e, "trigger_tick_failed");
      message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
  }
}

pub(crate) async fn run_tasks(State(state): State<Arc<AppState>>) -> Response {
  trigger_tick(state).await
}

pub(crate) async fn update_tasks(State(state): State<Arc<AppState>>) -> Response {
  trigger_tick(state).await
}

// ---- data objects ----

pub(crate) async fn create_data_object(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let object: DataObject = match parse(body) {
    Ok(object) => object,
    Err(response) => return response,
  };
  match state.store.register_data_object(&object).await {
    Ok(id) => {
      let value = stored(id.clone(), object);
      created(Kind::DataObject, &id, value)
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_data_objects(
  State(state): State<Arc<AppState>>,
  Query(query): Query<IndexQuery>,
) -> Response {
  match state.store.data_objects(query.q.as_deref()).await {
    Ok(items) => index(Kind::DataObject, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_data_object(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.data_object(&id).await {
    Ok(Some(object)) => reply(StatusCode::OK, stored(id, object)),
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

/// Index restricted to the file variant, as clients resolve import targets
/// against it.
pub(crate) async fn index_file_data_objects(
  State(state): State<Arc<AppState>>,
  Query(query): Query<IndexQuery>,
) -> Response {
  match state.store.data_objects(query.q.as_deref()).await {
    Ok(items) => {
      let files: Vec<Stored<DataObject>> = items
        .into_iter()
        .filter(|item| item.object.kind() == DataObjectKind::File)
        .collect();
      reply(StatusCode::OK, json!({ "file_data_objects": files }))
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn storage_locations_by_file(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  let object = match state.store.data_object(&id).await {
    Ok(Some(object)) => object,
    Ok(None) => return not_found(),
    Err(e) => return store_error(e),
  };
  let DataObject::File(file) = object else {
    return message(StatusCode::BAD_REQUEST, "not a file data object");
  };
  match state.store.locations_for(&file.file_contents).await {
    Ok(items) => reply(StatusCode::OK, json!({ "file_storage_locations": items })),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn file_imports_by_file(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.data_object(&id).await {
    Ok(Some(_)) => {}
    Ok(None) => return not_found(),
    Err(e) => return store_error(e),
  }
  match state.store.file_imports_for(&id).await {
    Ok(items) => reply(StatusCode::OK, json!({ "file_imports": items })),
    Err(e) => store_error(e),
  }
}

// ---- storage locations ----

pub(crate) async fn create_storage_location(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let location: StorageLocation = match parse(body) {
    Ok(location) => location,
    Err(response) => return response,
  };
  match state.store.add_location(&location).await {
    Ok(id) => {
      let value = stored(id.clone(), location);
      created(Kind::FileStorageLocation, &id, value)
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_storage_locations(State(state): State<Arc<AppState>>) -> Response {
  match state.store.locations().await {
    Ok(items) => index(Kind::FileStorageLocation, items),
    Err(e) => store_error(e),
  }
}

// ---- workflows ----

pub(crate) async fn create_workflow(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let workflow: Workflow = match parse(body) {
    Ok(workflow) => workflow,
    Err(response) => return response,
  };
  match state.store.register_workflow(&workflow).await {
    Ok(id) => {
      let value = stored(id.clone(), workflow);
      created(Kind::Workflow, &id, value)
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_workflows(
  State(state): State<Arc<AppState>>,
  Query(query): Query<IndexQuery>,
) -> Response {
  match state.store.workflows(query.q.as_deref()).await {
    Ok(items) => index(Kind::Workflow, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_workflow(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.workflow(&id).await {
    Ok(Some(workflow)) => reply(StatusCode::OK, stored(id, workflow)),
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

// ---- run requests and runs ----

/// Accepting a run request creates exactly one workflow run with it.
pub(crate) async fn create_run_request(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let request: RunRequest = match parse(body) {
    Ok(request) => request,
    Err(response) => return response,
  };

  let matches = match state.store.workflows(Some(&request.workflow)).await {
    Ok(matches) => matches,
    Err(e) => return store_error(e),
  };
  if matches.len() != 1 {
    return message(
      StatusCode::BAD_REQUEST,
      format!(
        "found {} workflows matching '{}', expected exactly 1",
        matches.len(),
        request.workflow
      ),
    );
  }
  let workflow = &matches[0];

  let request_id = match state.store.add_run_request(&request).await {
    Ok(id) => id,
    Err(e) => return store_error(e),
  };
  let run = match WorkflowRun::from_request(&workflow.object, &workflow.id, &request, &request_id)
  {
    Ok(run) => run,
    Err(e) => return message(StatusCode::BAD_REQUEST, e.to_string()),
  };
  if let Err(e) = state.store.add_workflow_run(&run).await {
    return store_error(e);
  }

  let value = stored(request_id.clone(), request);
  created(Kind::RunRequest, &request_id, value)
}

pub(crate) async fn index_run_requests(State(state): State<Arc<AppState>>) -> Response {
  match state.store.run_requests().await {
    Ok(items) => index(Kind::RunRequest, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_workflow_runs(
  State(state): State<Arc<AppState>>,
  Query(query): Query<IndexQuery>,
) -> Response {
  match state.store.workflow_runs(query.q.as_deref()).await {
    Ok(items) => index(Kind::WorkflowRun, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_workflow_run(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.workflow_run(&id).await {
    Ok(Some(run)) => reply(StatusCode::OK, stored(id, run)),
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_task_runs(State(state): State<Arc<AppState>>) -> Response {
  match state.store.task_runs().await {
    Ok(items) => index(Kind::TaskRun, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_task_run(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.task_run(&id).await {
    Ok(Some(run)) => reply(StatusCode::OK, stored(id, run)),
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

// ---- provenance ----

pub(crate) async fn create_file_import(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let import: FileImport = match parse(body) {
    Ok(import) => import,
    Err(response) => return response,
  };
  match state.store.add_file_import(&import).await {
    Ok(id) => {
      let value = stored(id.clone(), import);
      created(Kind::FileImport, &id, value)
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_file_imports(State(state): State<Arc<AppState>>) -> Response {
  match state.store.file_imports().await {
    Ok(items) => index(Kind::FileImport, items),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_file_import(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  match state.store.file_import(&id).await {
    Ok(Some(import)) => reply(StatusCode::OK, stored(id, import)),
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn update_file_import(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<Value>,
) -> Response {
  let import: FileImport = match parse(body) {
    Ok(import) => import,
    Err(response) => return response,
  };
  match state.store.file_import(&id).await {
    Ok(Some(_)) => {}
    Ok(None) => return not_found(),
    Err(e) => return store_error(e),
  }
  let value = match serde_json::to_value(&import) {
    Ok(value) => value,
    Err(e) => return message(StatusCode::BAD_REQUEST, e.to_string()),
  };
  if let Err(e) = state.store.put(Kind::FileImport, &id, value).await {
    return store_error(e);
  }
  let object = stored(id.clone(), import);
  reply(
    StatusCode::CREATED,
    json!({
      "message": "updated file_import",
      "_id": id,
      "object": object,
    }),
  )
}

// ---- data source records ----

pub(crate) async fn create_data_source_record(
  State(state): State<Arc<AppState>>,
  Json(body): Json<Value>,
) -> Response {
  let record: DataSourceRecord = match parse(body) {
    Ok(record) => record,
    Err(response) => return response,
  };
  match state.store.add_data_source_record(&record).await {
    Ok(id) => {
      let value = stored(id.clone(), record);
      created(Kind::DataSourceRecord, &id, value)
    }
    Err(e) => store_error(e),
  }
}

pub(crate) async fn index_data_source_records(State(state): State<Arc<AppState>>) -> Response {
  match state.store.data_source_records().await {
    Ok(items) => index(Kind::DataSourceRecord, items),
    Err(e) => store_error(e),
  }
}

// ---- misc ----

/// Show a record of any kind straight from the store, with its id merged
/// in beside the object's own fields.
async fn show_raw(state: Arc<AppState>, kind: Kind, id: String) -> Response {
  match state.store.get(kind, &id).await {
    Ok(Some(mut body)) => {
      if let Value::Object(fields) = &mut body {
        fields.insert("_id".to_string(), Value::String(id));
      }
      reply(StatusCode::OK, body)
    }
    Ok(None) => not_found(),
    Err(e) => store_error(e),
  }
}

pub(crate) async fn show_storage_location(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  show_raw(state, Kind::FileStorageLocation, id).await
}

pub(crate) async fn show_run_request(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  show_raw(state, Kind::RunRequest, id).await
}

pub(crate) async fn show_data_source_record(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Response {
  show_raw(state, Kind::DataSourceRecord, id).await
}

pub(crate) async fn reject_update() -> Response {
  message(StatusCode::BAD_REQUEST, "object is immutable")
}

pub(crate) async fn not_found_fallback() -> Response {
  not_found()
}
