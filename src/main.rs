use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use skein_client::ApiClient;
use skein_model::{FileHandlerSettings, HashFunction, WorkerSettings};
use skein_reconciler::{Reconciler, Scheduler};
use skein_server::AppState;
use skein_storage::{FileExporter, FileImporter, file_handler_for, parse_file_backend};
use skein_store::{MemoryStore, SqliteStore, Store};

/// Skein - a workflow execution orchestrator for computational pipelines
#[derive(Parser)]
#[command(name = "skein")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Coordinating service URL for client commands
  #[arg(long, global = true, default_value = "http://localhost:8000")]
  url: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the coordinating service
  Serve {
    /// Port to listen on
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Data directory (default: ~/.skein)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// SQLite database URL; in-memory storage when omitted
    #[arg(long)]
    database: Option<String>,

    /// Storage backend: local, remote, or cloud
    #[arg(long, default_value = "local")]
    file_backend: String,

    /// Execution backend: local, cluster, cloud, or dummy
    #[arg(long, default_value = "local")]
    worker_backend: String,

    /// Content hash function: md5 or sha256
    #[arg(long, default_value = "md5")]
    hash_function: String,

    /// File server address workers reach storage through
    #[arg(long, default_value = "localhost")]
    host_url: String,

    /// Cloud storage project id
    #[arg(long)]
    project_id: Option<String>,

    /// Cloud storage bucket id
    #[arg(long)]
    bucket_id: Option<String>,

    /// Endpoint override for S3-compatible object stores
    #[arg(long)]
    endpoint: Option<String>,

    /// Host the cluster backend submits over ssh to
    #[arg(long)]
    cluster_host: Option<String>,

    /// Job submission endpoint for the cloud execution backend
    #[arg(long)]
    cloud_endpoint: Option<String>,

    /// Reconciliation tick interval in milliseconds
    #[arg(long, default_value_t = 5000)]
    tick_interval_ms: u64,
  },

  /// Import files or workflows into the service
  Import {
    #[command(subcommand)]
    target: ImportTarget,
  },

  /// Export a registered file to the local filesystem
  Export {
    /// File name or id to export
    query: String,

    /// Directory to place the file in
    #[arg(long, default_value = ".")]
    dir: PathBuf,
  },

  /// Submit a run request for a workflow
  Run {
    /// Workflow name or id
    workflow: String,

    /// Input bindings as channel=data-object-id
    #[arg(long = "input", value_name = "CHANNEL=ID")]
    inputs: Vec<String>,
  },

  /// Show one workflow run, or list all of them
  Status {
    /// Workflow run id
    run_id: Option<String>,
  },

  /// Trigger one reconciliation tick
  Tick,
}

#[derive(Subcommand)]
enum ImportTarget {
  /// Import one or more files
  File {
    /// File paths to import
    files: Vec<PathBuf>,

    /// Description of the data source, for traceability
    #[arg(long)]
    note: Option<String>,
  },

  /// Import a workflow definition from a JSON file
  Workflow {
    /// Path to the workflow file
    workflow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  let runtime = tokio::runtime::Runtime::new()?;
  runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
  let client = ApiClient::new(cli.url.clone());
  match cli.command {
    Commands::Serve {
      port,
      data_dir,
      database,
      file_backend,
      worker_backend,
      hash_function,
      host_url,
      project_id,
      bucket_id,
      endpoint,
      cluster_host,
      cloud_endpoint,
      tick_interval_ms,
    } => {
      let data_dir = data_dir.unwrap_or_else(|| {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".skein")
      });
      let filehandler_settings = FileHandlerSettings {
        hash_function: parse_hash_function(&hash_function)?,
        backend: parse_file_backend(&file_backend)?,
        file_root: data_dir.join("files").display().to_string(),
        import_dir: "imported_files".to_string(),
        host_url,
        project_id,
        bucket_id,
        endpoint,
      };
      let worker_settings = WorkerSettings {
        backend: skein_dispatch::parse_worker_backend(&worker_backend)?,
        working_dir: data_dir.join("work").display().to_string(),
        cluster_host,
        cloud_endpoint,
      };
      serve(
        port,
        database,
        filehandler_settings,
        worker_settings,
        Duration::from_millis(tick_interval_ms),
      )
      .await
    }
    Commands::Import { target } => match target {
      ImportTarget::File { files, note } => import_files(client, files, note).await,
      ImportTarget::Workflow { workflow_file } => import_workflow(client, workflow_file).await,
    },
    Commands::Export { query, dir } => export_file(client, query, dir).await,
    Commands::Run { workflow, inputs } => submit_run(client, workflow, inputs).await,
    Commands::Status { run_id } => show_status(client, run_id).await,
    Commands::Tick => {
      client.run_tasks().await?;
      client.update_tasks().await?;
      println!("tick triggered");
      Ok(())
    }
  }
}

fn parse_hash_function(name: &str) -> Result<HashFunction> {
  match name.to_ascii_lowercase().as_str() {
    "md5" => Ok(HashFunction::Md5),
    "sha256" => Ok(HashFunction::Sha256),
    other => bail!("unsupported hash function '{other}'"),
  }
}

async fn serve(
  port: u16,
  database: Option<String>,
  filehandler_settings: FileHandlerSettings,
  worker_settings: WorkerSettings,
  tick_interval: Duration,
) -> Result<()> {
  let store: Arc<dyn Store> = match &database {
    Some(url) => Arc::new(
      SqliteStore::connect(url)
        .await
        .with_context(|| format!("failed to open database {url}"))?,
    ),
    None => Arc::new(MemoryStore::new()),
  };

  let handler = file_handler_for(&filehandler_settings)
    .await
    .context("failed to build file handler")?;
  let manager = skein_dispatch::task_manager_for(&worker_settings, handler.clone())
    .context("failed to build task manager")?;
  let reconciler = Arc::new(Reconciler::new(
    store.clone(),
    manager,
    handler,
    filehandler_settings.hash_function,
    worker_settings.working_dir.clone(),
  ));

  let cancel = CancellationToken::new();
  let scheduler = Scheduler::new(reconciler.clone(), tick_interval);
  tokio::spawn(scheduler.run(cancel.clone()));

  let state = Arc::new(AppState {
    store,
    reconciler,
    filehandler_settings,
    worker_settings,
    version: env!("CARGO_PKG_VERSION").to_string(),
  });
  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let result = skein_server::serve(addr, state).await;
  cancel.cancel();
  result.context("server error")
}

async fn import_files(client: ApiClient, files: Vec<PathBuf>, note: Option<String>) -> Result<()> {
  if files.is_empty() {
    bail!("no files given");
  }
  let settings = client
    .get_filehandler_settings()
    .await
    .context("failed to fetch file handler settings")?;
  let handler = file_handler_for(&settings).await?;
  let importer = FileImporter::new(client, handler, settings.hash_function);

  for imported in importer.import_files(&files, note.as_deref()).await? {
    println!(
      "imported {} -> {}",
      imported.file_id,
      imported.destination.address.describe()
    );
  }
  Ok(())
}

async fn import_workflow(client: ApiClient, workflow_file: PathBuf) -> Result<()> {
  let content = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read {}", workflow_file.display()))?;
  let workflow: skein_model::Workflow = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse {}", workflow_file.display()))?;
  let (id, workflow) = client.post_workflow(&workflow).await?;
  println!("imported workflow {}@{id}", workflow.name);
  Ok(())
}

async fn export_file(client: ApiClient, query: String, dir: PathBuf) -> Result<()> {
  let settings = client.get_filehandler_settings().await?;
  let handler = file_handler_for(&settings).await?;
  let exporter = FileExporter::new(client, handler);
  let path = exporter.export_file(&query, &dir).await?;
  println!("exported to {}", path.display());
  Ok(())
}

async fn submit_run(client: ApiClient, workflow: String, inputs: Vec<String>) -> Result<()> {
  let mut request_inputs = Vec::with_capacity(inputs.len());
  for input in &inputs {
    let Some((channel, data_object_id)) = input.split_once('=') else {
      bail!("input '{input}' is not of the form channel=data-object-id");
    };
    request_inputs.push(skein_model::RunRequestInput {
      channel: channel.to_string(),
      data_object_id: data_object_id.to_string(),
    });
  }

  let (request_id, _) = client
    .post_run_request(&skein_model::RunRequest {
      workflow,
      inputs: request_inputs,
      requester: None,
    })
    .await?;
  let run = client
    .get_workflow_run_index(Some(&request_id), 1, 1)
    .await?
    .remove(0);
  println!("workflow run {}", run.id);
  Ok(())
}

async fn show_status(client: ApiClient, run_id: Option<String>) -> Result<()> {
  match run_id {
    Some(run_id) => {
      let Some(run) = client.get_workflow_run(&run_id).await? else {
        bail!("workflow run '{run_id}' not found");
      };
      println!("{} {} {:?}", run.id, run.workflow.name, run.status);
      for step_run in &run.step_runs {
        println!("  {} {:?}", step_run.step_name, step_run.status);
      }
    }
    None => {
      for run in client.get_workflow_run_index(None, 0, usize::MAX).await? {
        println!("{} {} {:?}", run.id, run.object.workflow.name, run.object.status);
      }
    }
  }
  Ok(())
}
