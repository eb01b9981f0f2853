//! Integration tests for the API surface, driven through the typed client.

use std::sync::Arc;

use skein_client::{ApiClient, ClientError};
use skein_dispatch::DummyTaskManager;
use skein_model::{
  DataObject, DataObjectArray, FileContents, FileDataObject, FileImport, HashFunction,
  Port, PortRef, RunRequest, RunRequestInput, RunStatus, StorageAddress, StorageLocation,
  Step, StringDataObject, Workflow, WorkflowInput,
};
use skein_reconciler::Reconciler;
use skein_server::AppState;
use skein_storage::LocalFileHandler;
use skein_store::MemoryStore;

struct TestServer {
  client: ApiClient,
  _tempdir: tempfile::TempDir,
}

async fn spawn_server() -> TestServer {
  let tempdir = tempfile::tempdir().unwrap();
  let file_root = tempdir.path().join("data");
  let working_dir = tempdir.path().join("work");

  let store = Arc::new(MemoryStore::new());
  let filehandler_settings =
    skein_model::FileHandlerSettings::local(file_root.display().to_string());
  let worker_settings = skein_model::WorkerSettings::local(working_dir.display().to_string());
  let handler = Arc::new(LocalFileHandler::new(filehandler_settings.clone()));
  let manager = Arc::new(DummyTaskManager::new());
  let reconciler = Arc::new(Reconciler::new(
    store.clone(),
    manager,
    handler,
    filehandler_settings.hash_function,
    working_dir,
  ));

  let state = Arc::new(AppState {
    store,
    reconciler,
    filehandler_settings,
    worker_settings,
    version: env!("CARGO_PKG_VERSION").to_string(),
  });

  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let app = skein_server::router(state);
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });

  TestServer {
    client: ApiClient::new(format!("http://{addr}")),
    _tempdir: tempdir,
  }
}

fn string_object(value: &str) -> DataObject {
  DataObject::String(StringDataObject {
    string_value: value.to_string(),
  })
}

fn file_object(name: &str, hash: &str) -> DataObject {
  DataObject::File(FileDataObject {
    file_name: name.to_string(),
    file_contents: FileContents {
      hash_function: HashFunction::Md5,
      hash_value: hash.to_string(),
    },
    metadata: Default::default(),
  })
}

fn one_step_workflow(name: &str, command: &str) -> Workflow {
  Workflow {
    name: name.to_string(),
    steps: vec![Step {
      name: "s1".to_string(),
      command: command.to_string(),
      environment: Default::default(),
      resources: Default::default(),
      input_ports: vec![Port {
        name: "in".to_string(),
        file_path: "in.txt".to_string(),
      }],
      output_ports: vec![],
    }],
    inputs: vec![WorkflowInput {
      channel: "in".to_string(),
      destination: PortRef {
        step: "s1".to_string(),
        port: "in".to_string(),
      },
    }],
    data_pipes: vec![],
  }
}

#[tokio::test]
async fn data_objects_round_trip_and_deduplicate() {
  let server = spawn_server().await;
  let object = string_object("hello");

  let (id, returned) = server.client.post_data_object(&object).await.unwrap();
  assert_eq!(returned, object);

  // Identical content resolves to the same id without a second record.
  let (second_id, _) = server.client.post_data_object(&object).await.unwrap();
  assert_eq!(second_id, id);
  assert_eq!(server.client.get_data_object_index(None).await.unwrap().len(), 1);

  let fetched = server.client.get_data_object(&id).await.unwrap().unwrap();
  assert_eq!(fetched, object);
}

#[tokio::test]
async fn unknown_ids_show_as_not_found() {
  let server = spawn_server().await;
  assert!(server.client.get_data_object("missing").await.unwrap().is_none());
  assert!(server.client.get_workflow_run("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn heterogeneous_arrays_are_rejected_and_persist_nothing() {
  let server = spawn_server().await;
  let mixed = DataObject::Array(DataObjectArray {
    data_objects: vec![string_object("a"), file_object("f.txt", "aa")],
  });

  let err = server.client.post_data_object(&mixed).await.unwrap_err();
  let ClientError::Response { status, body } = err else {
    panic!("expected a response error");
  };
  assert_eq!(status, 400);
  assert!(body.contains("message"));
  assert!(server.client.get_data_object_index(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn workflow_index_enforces_cardinality_bounds() {
  let server = spawn_server().await;
  server
    .client
    .post_workflow(&one_step_workflow("alpha", "cat in.txt"))
    .await
    .unwrap();

  // Exactly one match is returned as-is.
  let matched = server
    .client
    .get_workflow_index(Some("alpha"), 1, 1)
    .await
    .unwrap();
  assert_eq!(matched.len(), 1);
  assert_eq!(matched[0].object.name, "alpha");

  // Zero matches underflows the bound.
  let err = server
    .client
    .get_workflow_index(Some("missing"), 1, 1)
    .await
    .unwrap_err();
  assert!(matches!(err, ClientError::TooFewMatches { found: 0, .. }));
  assert!(err.is_cardinality());

  // A second distinct workflow with the same name overflows it.
  server
    .client
    .post_workflow(&one_step_workflow("alpha", "wc -l in.txt"))
    .await
    .unwrap();
  let err = server
    .client
    .get_workflow_index(Some("alpha"), 1, 1)
    .await
    .unwrap_err();
  assert!(matches!(err, ClientError::TooManyMatches { found: 2, .. }));
}

#[tokio::test]
async fn storage_locations_and_imports_are_discoverable_per_file() {
  let server = spawn_server().await;
  let object = file_object("data.bin", "feedc0de");
  let (file_id, _) = server.client.post_data_object(&object).await.unwrap();

  assert!(
    server
      .client
      .get_storage_locations_by_file(&file_id)
      .await
      .unwrap()
      .is_empty()
  );

  let location = StorageLocation {
    file_contents: FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "feedc0de".to_string(),
    },
    address: StorageAddress::LocalPath {
      file_path: "/data/imported_files/x_data.bin".to_string(),
    },
  };
  server.client.post_file_storage_location(&location).await.unwrap();

  let locations = server
    .client
    .get_storage_locations_by_file(&file_id)
    .await
    .unwrap();
  assert_eq!(locations.len(), 1);
  assert_eq!(locations[0].object, location);

  let import = FileImport {
    file_data_object_id: file_id.clone(),
    source_path: "/home/u/data.bin".to_string(),
    note: Some("uploaded from the sequencer".to_string()),
    destination: location,
    imported_at: chrono::Utc::now(),
  };
  server.client.post_file_import(&import).await.unwrap();
  let imports = server.client.get_file_imports_by_file(&file_id).await.unwrap();
  assert_eq!(imports.len(), 1);
  assert_eq!(imports[0].object.note, import.note);
}

#[tokio::test]
async fn run_request_creates_exactly_one_pending_workflow_run() {
  let server = spawn_server().await;
  server
    .client
    .post_workflow(&one_step_workflow("wf", "cat in.txt"))
    .await
    .unwrap();
  let (object_id, _) = server
    .client
    .post_data_object(&file_object("in.txt", "aa"))
    .await
    .unwrap();

  let request = RunRequest {
    workflow: "wf".to_string(),
    inputs: vec![RunRequestInput {
      channel: "in".to_string(),
      data_object_id: object_id,
    }],
    requester: Some("someone@example.com".to_string()),
  };
  let (request_id, _) = server.client.post_run_request(&request).await.unwrap();

  let runs = server
    .client
    .get_workflow_run_index(Some(&request_id), 1, 1)
    .await
    .unwrap();
  assert_eq!(runs[0].object.status, RunStatus::Pending);
  assert_eq!(runs[0].object.run_request_id, request_id);
  assert_eq!(runs[0].object.step_runs.len(), 1);
}

#[tokio::test]
async fn run_request_for_unknown_workflow_is_rejected() {
  let server = spawn_server().await;
  let request = RunRequest {
    workflow: "ghost".to_string(),
    inputs: vec![],
    requester: None,
  };
  let err = server.client.post_run_request(&request).await.unwrap_err();
  let ClientError::Response { status, .. } = err else {
    panic!("expected a response error");
  };
  assert_eq!(status, 400);
}

#[tokio::test]
async fn informational_endpoints_report_settings() {
  let server = spawn_server().await;

  let time = server.client.get_server_time().await.unwrap();
  assert!((chrono::Utc::now() - time).num_seconds().abs() < 60);

  let filehandler = server.client.get_filehandler_settings().await.unwrap();
  assert_eq!(filehandler.hash_function, HashFunction::Md5);
  assert_eq!(filehandler.import_dir, "imported_files");

  let worker = server.client.get_worker_settings().await.unwrap();
  assert_eq!(worker.backend, skein_model::WorkerBackend::Local);

  assert_eq!(
    server.client.get_version().await.as_deref(),
    Some(env!("CARGO_PKG_VERSION"))
  );
}

#[tokio::test]
async fn tick_triggers_are_safe_to_call_repeatedly() {
  let server = spawn_server().await;
  server.client.run_tasks().await.unwrap();
  server.client.run_tasks().await.unwrap();
  server.client.update_tasks().await.unwrap();
  server.client.update_tasks().await.unwrap();
}

#[tokio::test]
async fn connectivity_errors_surface_immediately() {
  // Nothing listens here.
  let client = ApiClient::new("http://127.0.0.1:1");
  let err = client.get_data_object_index(None).await.unwrap_err();
  assert!(matches!(err, ClientError::Connectivity { .. }));
}
