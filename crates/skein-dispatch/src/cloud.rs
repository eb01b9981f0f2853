//! Cloud task manager: submits task runs as managed jobs over HTTP.
//!
//! The compute backend is opaque beyond this submit/poll contract: POST a
//! job, then GET its status until it reports a terminal state.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use skein_model::TaskRun;

use crate::manager::{RunContext, TaskManager, TaskOutcome};
use crate::DispatchError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JobStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
}

#[derive(Debug, Deserialize)]
struct JobReport {
  status: JobStatus,
  #[serde(default)]
  exit_code: Option<i32>,
  #[serde(default)]
  message: Option<String>,
}

/// Submits each task to an external managed-job endpoint.
pub struct CloudTaskManager {
  endpoint: String,
  http: reqwest::Client,
}

impl CloudTaskManager {
  pub fn new(endpoint: impl Into<String>) -> Self {
    let mut endpoint = endpoint.into();
    while endpoint.ends_with('/') {
      endpoint.pop();
    }
    Self {
      endpoint,
      http: reqwest::Client::new(),
    }
  }

  fn backend_error(&self, error: reqwest::Error) -> DispatchError {
    DispatchError::Backend {
      message: format!("cloud job endpoint {}: {error}", self.endpoint),
    }
  }
}

#[async_trait]
impl TaskManager for CloudTaskManager {
  #[instrument(
    name = "cloud_dispatch",
    skip(self, task_run, context),
    fields(task_run_id = %task_run.id)
  )]
  async fn run(&self, task_run: &TaskRun, context: &RunContext) -> Result<(), DispatchError> {
    let body = serde_json::json!({
      "task_run_id": task_run.id,
      "workflow_run_id": context.workflow_run_id,
      "command": context.command,
      "environment": context.environment,
      "resources": context.resources,
      "inputs": context.inputs,
      "run_dir": context.run_dir,
    });

    let response = self
      .http
      .post(format!("{}/jobs/", self.endpoint))
      .json(&body)
      .send()
      .await
      .map_err(|e| self.backend_error(e))?;

    let status = response.status().as_u16();
    if status == 409 {
      return Err(DispatchError::Conflict {
        task_run_id: task_run.id.clone(),
      });
    }
    if !(200..300).contains(&status) {
      let body = response.text().await.unwrap_or_default();
      return Err(DispatchError::Submit { status, body });
    }

    info!(step = %task_run.step_name, "job_submitted");
    Ok(())
  }

  async fn poll(&self, task_run_id: &str) -> Result<Option<TaskOutcome>, DispatchError> {
    let response = self
      .http
      .get(format!("{}/jobs/{}/", self.endpoint, task_run_id))
      .send()
      .await
      .map_err(|e| self.backend_error(e))?;

    let status = response.status().as_u16();
    if status == 404 {
      return Err(DispatchError::UnknownTaskRun {
        task_run_id: task_run_id.to_string(),
      });
    }
    if !(200..300).contains(&status) {
      let body = response.text().await.unwrap_or_default();
      return Err(DispatchError::Submit { status, body });
    }

    let report: JobReport = response.json().await.map_err(|e| self.backend_error(e))?;
    match report.status {
      JobStatus::Pending | JobStatus::Running => Ok(None),
      JobStatus::Succeeded => Ok(Some(TaskOutcome {
        success: true,
        exit_code: report.exit_code.or(Some(0)),
        message: report.message,
        // Outputs live in object storage, registered by the job itself.
        run_dir: None,
      })),
      JobStatus::Failed => Ok(Some(TaskOutcome {
        success: false,
        exit_code: report.exit_code,
        message: report.message,
        run_dir: None,
      })),
    }
  }
}
