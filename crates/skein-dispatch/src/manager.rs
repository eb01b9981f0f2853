//! The task manager boundary.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skein_model::{Environment, ResourceRequest, StorageLocation, TaskRun};

use crate::DispatchError;

/// One input file to stage into the run directory before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedInput {
  /// Path relative to the run directory, from the step's input port.
  pub file_path: String,
  pub location: StorageLocation,
}

/// Everything a backend needs to execute one task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
  pub workflow_run_id: String,
  /// Per-run working directory: `<working root>/<workflow run>/<step run>`.
  pub run_dir: PathBuf,
  pub inputs: Vec<StagedInput>,
  pub command: String,
  pub environment: Environment,
  pub resources: ResourceRequest,
}

/// Backend-reported result of a finished task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
  pub success: bool,
  pub exit_code: Option<i32>,
  pub message: Option<String>,
  /// The run directory, when it is readable from the orchestrator host.
  /// Remote backends report `None` and register outputs themselves.
  pub run_dir: Option<PathBuf>,
}

impl TaskOutcome {
  pub fn succeeded(run_dir: Option<PathBuf>) -> Self {
    Self {
      success: true,
      exit_code: Some(0),
      message: None,
      run_dir,
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      success: false,
      exit_code: None,
      message: Some(message.into()),
      run_dir: None,
    }
  }
}

/// Executes task runs on one compute substrate.
///
/// `run` must only be called after the store's `pending -> running` claim
/// succeeded; it begins execution and returns without waiting. `poll` is
/// repeatable and side-effect free: it reports the latest known state,
/// `None` while the unit is still executing.
#[async_trait]
pub trait TaskManager: Send + Sync {
  async fn run(&self, task_run: &TaskRun, context: &RunContext) -> Result<(), DispatchError>;

  async fn poll(&self, task_run_id: &str) -> Result<Option<TaskOutcome>, DispatchError>;
}
