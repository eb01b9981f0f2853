//! Run records: the mutable state the reconciler advances.
//!
//! Status moves `pending -> running -> {complete | failed}` and is terminal
//! once complete or failed. Every transition in the system goes through the
//! store's conditional claim primitive; these types never mutate their own
//! status behind the store's back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ValidationError;
use crate::id::content_id;
use crate::workflow::{Step, Workflow};

/// Lifecycle state shared by task, step, and workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Complete,
  Failed,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Complete | Self::Failed)
  }

  /// Wire form of the status, as persisted and as matched by the store's
  /// conditional transition.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Complete => "complete",
      Self::Failed => "failed",
    }
  }
}

/// Binds one data object to one named port of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
  pub port: String,
  pub data_object_id: String,
}

/// One input assignment in a run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequestInput {
  pub channel: String,
  pub data_object_id: String,
}

/// A client's request to execute a workflow against specific inputs.
///
/// Immutable; accepting one creates exactly one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
  /// Workflow name or id; resolved with cardinality bounds at submission.
  pub workflow: String,
  #[serde(default)]
  pub inputs: Vec<RunRequestInput>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub requester: Option<String>,
}

/// Execution state of one dispatched unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
  pub id: String,
  pub workflow_run_id: String,
  pub step_name: String,
  /// Immutable copy of the step definition this run executes.
  pub step: Step,
  pub input_bindings: Vec<Binding>,
  #[serde(default)]
  pub output_bindings: Vec<Binding>,
  pub status: RunStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
  /// Deterministic id for the task run of `step_name` within one workflow
  /// run. Creating the "same" task run twice therefore collides on id, and
  /// the store's insert-if-absent keeps the first record.
  pub fn id_for(workflow_run_id: &str, step_name: &str) -> String {
    content_id(&serde_json::json!({
      "workflow_run_id": workflow_run_id,
      "step_name": step_name,
    }))
  }

  pub fn new(
    workflow_run_id: &str,
    step: &Step,
    input_bindings: Vec<Binding>,
  ) -> Self {
    Self {
      id: Self::id_for(workflow_run_id, &step.name),
      workflow_run_id: workflow_run_id.to_string(),
      step_name: step.name.clone(),
      step: step.clone(),
      input_bindings,
      output_bindings: Vec::new(),
      status: RunStatus::Pending,
      message: None,
      created_at: Utc::now(),
      finished_at: None,
    }
  }
}

/// Per-step view of a workflow run, derived from its task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
  pub step_name: String,
  pub status: RunStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_run_id: Option<String>,
}

/// Execution state of a whole workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
  pub id: String,
  pub run_request_id: String,
  pub workflow_id: String,
  /// Immutable copy of the definition being executed.
  pub workflow: Workflow,
  /// Channel assignments carried over from the run request.
  pub inputs: Vec<RunRequestInput>,
  pub status: RunStatus,
  pub step_runs: Vec<StepRun>,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
  /// Instantiate the single workflow run for an accepted run request.
  ///
  /// Rejects requests naming channels the workflow does not declare, or
  /// leaving a declared channel unbound.
  pub fn from_request(
    workflow: &Workflow,
    workflow_id: &str,
    request: &RunRequest,
    run_request_id: &str,
  ) -> Result<Self, ValidationError> {
    for input in &request.inputs {
      if !workflow.inputs.iter().any(|w| w.channel == input.channel) {
        return Err(ValidationError::UnknownChannel {
          channel: input.channel.clone(),
          workflow: workflow.name.clone(),
        });
      }
    }
    for declared in &workflow.inputs {
      if !request.inputs.iter().any(|i| i.channel == declared.channel) {
        return Err(ValidationError::MissingChannel {
          channel: declared.channel.clone(),
        });
      }
    }

    let step_runs = workflow
      .steps
      .iter()
      .map(|step| StepRun {
        step_name: step.name.clone(),
        status: RunStatus::Pending,
        task_run_id: None,
      })
      .collect();

    Ok(Self {
      id: uuid::Uuid::new_v4().to_string(),
      run_request_id: run_request_id.to_string(),
      workflow_id: workflow_id.to_string(),
      workflow: workflow.clone(),
      inputs: request.inputs.clone(),
      status: RunStatus::Pending,
      step_runs,
      created_at: Utc::now(),
      finished_at: None,
    })
  }
}
