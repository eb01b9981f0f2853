//! End-to-end: import files, submit a workflow, let the scheduler drive the
//! run to completion on the local backend, and verify the registered output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use skein_client::ApiClient;
use skein_dispatch::LocalTaskManager;
use skein_model::{
  DataObject, HashFunction, Port, PortRef, RunRequest, RunRequestInput, RunStatus, Step,
  Workflow, WorkflowInput,
};
use skein_reconciler::{Reconciler, Scheduler};
use skein_server::AppState;
use skein_storage::{FileExporter, FileHandler, FileImporter, LocalFileHandler, hash_file};
use skein_store::MemoryStore;

const HELLO_MD5: &str = "b1946ac92492d2347c6235b4d2611184";
const HELLO_WORLD_MD5: &str = "0f723ae7f9bf07744445e93ac5595156";

struct Deployment {
  client: ApiClient,
  handler: Arc<dyn FileHandler>,
  cancel: CancellationToken,
  source_dir: PathBuf,
  export_dir: PathBuf,
  _tempdir: tempfile::TempDir,
}

async fn deploy() -> Deployment {
  let tempdir = tempfile::tempdir().unwrap();
  let file_root = tempdir.path().join("data");
  let working_dir = tempdir.path().join("work");
  let source_dir = tempdir.path().join("src");
  let export_dir = tempdir.path().join("export");
  std::fs::create_dir_all(&source_dir).unwrap();
  std::fs::create_dir_all(&export_dir).unwrap();

  let store = Arc::new(MemoryStore::new());
  let filehandler_settings =
    skein_model::FileHandlerSettings::local(file_root.display().to_string());
  let worker_settings = skein_model::WorkerSettings::local(working_dir.display().to_string());

  let handler: Arc<dyn FileHandler> =
    Arc::new(LocalFileHandler::new(filehandler_settings.clone()));
  let manager = Arc::new(LocalTaskManager::new(handler.clone()));
  let reconciler = Arc::new(Reconciler::new(
    store.clone(),
    manager,
    handler.clone(),
    filehandler_settings.hash_function,
    working_dir,
  ));

  // The scheduler owns dispatch timing, independent of the HTTP layer.
  let cancel = CancellationToken::new();
  let scheduler = Scheduler::new(reconciler.clone(), Duration::from_millis(25));
  tokio::spawn(scheduler.run(cancel.clone()));

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

  Deployment {
    client: ApiClient::new(format!("http://{addr}")),
    handler,
    cancel,
    source_dir,
    export_dir,
    _tempdir: tempdir,
  }
}

fn hello_world_workflow() -> Workflow {
  Workflow {
    name: "hello_world".to_string(),
    steps: vec![Step {
      name: "join".to_string(),
      command: "cat hello.txt world.txt > hello_world.txt".to_string(),
      environment: Default::default(),
      resources: Default::default(),
      input_ports: vec![
        Port {
          name: "hello".to_string(),
          file_path: "hello.txt".to_string(),
        },
        Port {
          name: "world".to_string(),
          file_path: "world.txt".to_string(),
        },
      ],
      output_ports: vec![Port {
        name: "joined".to_string(),
        file_path: "hello_world.txt".to_string(),
      }],
    }],
    inputs: vec![
      WorkflowInput {
        channel: "hello".to_string(),
        destination: PortRef {
          step: "join".to_string(),
          port: "hello".to_string(),
        },
      },
      WorkflowInput {
        channel: "world".to_string(),
        destination: PortRef {
          step: "join".to_string(),
          port: "world".to_string(),
        },
      },
    ],
    data_pipes: vec![],
  }
}

#[tokio::test]
async fn imported_files_flow_through_a_workflow_to_a_registered_output() {
  let deployment = deploy().await;
  let client = &deployment.client;

  // Import the inputs through the two-phase protocol.
  let hello_path = deployment.source_dir.join("hello.txt");
  let world_path = deployment.source_dir.join("world.txt");
  std::fs::write(&hello_path, b"hello\n").unwrap();
  std::fs::write(&world_path, b"world\n").unwrap();

  let settings = client.get_filehandler_settings().await.unwrap();
  let importer = FileImporter::new(
    client.clone(),
    deployment.handler.clone(),
    settings.hash_function,
  );
  let hello = importer
    .import_file(&hello_path, Some("end to end input"))
    .await
    .unwrap();
  let world = importer.import_file(&world_path, None).await.unwrap();

  let DataObject::File(hello_file) = &hello.object else {
    panic!("imports register file data objects");
  };
  assert_eq!(hello_file.file_contents.hash_value, HELLO_MD5);

  // Imports registered a storage location and provenance.
  assert_eq!(
    client
      .get_storage_locations_by_file(&hello.file_id)
      .await
      .unwrap()
      .len(),
    1
  );
  assert_eq!(
    client
      .get_file_imports_by_file(&hello.file_id)
      .await
      .unwrap()
      .len(),
    1
  );

  // Submit the workflow and a run request bound to the imported inputs.
  client.post_workflow(&hello_world_workflow()).await.unwrap();
  let request = RunRequest {
    workflow: "hello_world".to_string(),
    inputs: vec![
      RunRequestInput {
        channel: "hello".to_string(),
        data_object_id: hello.file_id.clone(),
      },
      RunRequestInput {
        channel: "world".to_string(),
        data_object_id: world.file_id.clone(),
      },
    ],
    requester: None,
  };
  let (request_id, _) = client.post_run_request(&request).await.unwrap();
  let run_id = client
    .get_workflow_run_index(Some(&request_id), 1, 1)
    .await
    .unwrap()
    .remove(0)
    .id;

  // The HTTP triggers invoke the same tick the scheduler repeats.
  client.run_tasks().await.unwrap();

  // Wait for the scheduler to drive the run to a terminal state.
  let mut finished = None;
  for _ in 0..400 {
    let run = client.get_workflow_run(&run_id).await.unwrap().unwrap();
    if run.status.is_terminal() {
      finished = Some(run);
      break;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  let run = finished.expect("workflow run did not finish in time");
  assert_eq!(run.status, RunStatus::Complete);
  assert_eq!(run.step_runs[0].status, RunStatus::Complete);

  // The output is a new file data object with a registered location.
  let task_run_id = run.step_runs[0].task_run_id.clone().unwrap();
  let task_run = client.get_task_run(&task_run_id).await.unwrap().unwrap();
  assert_eq!(task_run.status, RunStatus::Complete);
  assert_eq!(task_run.output_bindings.len(), 1);
  assert_eq!(task_run.output_bindings[0].port, "joined");

  let output_id = &task_run.output_bindings[0].data_object_id;
  let output = client.get_data_object(output_id).await.unwrap().unwrap();
  let DataObject::File(output_file) = &output else {
    panic!("step outputs register as file data objects");
  };
  assert_eq!(output_file.file_name, "hello_world.txt");
  assert_eq!(output_file.file_contents.hash_value, HELLO_WORLD_MD5);

  let output_locations = client.get_storage_locations_by_file(output_id).await.unwrap();
  assert_eq!(output_locations.len(), 1);

  // Export the result and verify the bytes on disk hash identically.
  let exporter = FileExporter::new(client.clone(), deployment.handler.clone());
  let exported = exporter
    .export_file("hello_world.txt", &deployment.export_dir)
    .await
    .unwrap();
  assert_eq!(std::fs::read(&exported).unwrap(), b"hello\nworld\n");
  let rehashed = hash_file(&exported, HashFunction::Md5).await.unwrap();
  assert_eq!(rehashed.hash_value, HELLO_WORLD_MD5);

  deployment.cancel.cancel();
}

#[tokio::test]
async fn a_failing_step_fails_the_workflow_run() {
  let deployment = deploy().await;
  let client = &deployment.client;

  let workflow = Workflow {
    name: "doomed".to_string(),
    steps: vec![Step {
      name: "boom".to_string(),
      command: "exit 7".to_string(),
      environment: Default::default(),
      resources: Default::default(),
      input_ports: vec![],
      output_ports: vec![],
    }],
    inputs: vec![],
    data_pipes: vec![],
  };
  client.post_workflow(&workflow).await.unwrap();

  let (request_id, _) = client
    .post_run_request(&RunRequest {
      workflow: "doomed".to_string(),
      inputs: vec![],
      requester: None,
    })
    .await
    .unwrap();
  let run_id = client
    .get_workflow_run_index(Some(&request_id), 1, 1)
    .await
    .unwrap()
    .remove(0)
    .id;

  let mut finished = None;
  for _ in 0..400 {
    let run = client.get_workflow_run(&run_id).await.unwrap().unwrap();
    if run.status.is_terminal() {
      finished = Some(run);
      break;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  let run = finished.expect("workflow run did not finish in time");
  assert_eq!(run.status, RunStatus::Failed);

  let task_run_id = run.step_runs[0].task_run_id.clone().unwrap();
  let task_run = client.get_task_run(&task_run_id).await.unwrap().unwrap();
  assert_eq!(task_run.status, RunStatus::Failed);
  assert!(task_run.message.unwrap().contains("exited"));

  deployment.cancel.cancel();
}
