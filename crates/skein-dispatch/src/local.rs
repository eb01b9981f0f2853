//! Local task manager: executes task runs as child processes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use skein_model::TaskRun;
use skein_storage::FileHandler;

use crate::manager::{RunContext, TaskManager, TaskOutcome};
use crate::DispatchError;

enum ChildState {
  Running { child: Child, run_dir: PathBuf },
  Done(TaskOutcome),
}

/// Runs each task as a subprocess on the orchestrator host.
///
/// Inputs are staged into a per-run working directory through the file
/// handler before the command is spawned; requested resources are advisory.
pub struct LocalTaskManager {
  handler: Arc<dyn FileHandler>,
  children: Mutex<HashMap<String, ChildState>>,
}

impl LocalTaskManager {
  pub fn new(handler: Arc<dyn FileHandler>) -> Self {
    Self {
      handler,
      children: Mutex::new(HashMap::new()),
    }
  }
}

fn launch_error(message: String) -> DispatchError {
  DispatchError::Launch { message }
}

#[async_trait]
impl TaskManager for LocalTaskManager {
  #[instrument(
    name = "task_dispatch",
    skip(self, task_run, context),
    fields(task_run_id = %task_run.id, step = %task_run.step_name)
  )]
  async fn run(&self, task_run: &TaskRun, context: &RunContext) -> Result<(), DispatchError> {
    {
      let children = self.children.lock().await;
      if children.contains_key(&task_run.id) {
        return Err(DispatchError::Conflict {
          task_run_id: task_run.id.clone(),
        });
      }
    }

    tokio::fs::create_dir_all(&context.run_dir)
      .await
      .map_err(|e| launch_error(format!("create run dir: {e}")))?;

    for input in &context.inputs {
      let target = context.run_dir.join(&input.file_path);
      self.handler.download(&input.location, &target).await?;
    }

    if let Some(cores) = context.resources.cores {
      debug!(cores, "advisory core request");
    }

    let stdout = std::fs::File::create(context.run_dir.join("stdout.log"))
      .map_err(|e| launch_error(format!("create stdout log: {e}")))?;
    let stderr = std::fs::File::create(context.run_dir.join("stderr.log"))
      .map_err(|e| launch_error(format!("create stderr log: {e}")))?;

    let child = Command::new("sh")
      .arg("-c")
      .arg(&context.command)
      .current_dir(&context.run_dir)
      .envs(&context.environment.variables)
      .stdin(Stdio::null())
      .stdout(Stdio::from(stdout))
      .stderr(Stdio::from(stderr))
      .spawn()
      .map_err(|e| launch_error(format!("spawn command: {e}")))?;

    info!(
      run_dir = %context.run_dir.display(),
      command = %context.command,
      "task_started"
    );

    let mut children = self.children.lock().await;
    children.insert(
      task_run.id.clone(),
      ChildState::Running {
        child,
        run_dir: context.run_dir.clone(),
      },
    );
    Ok(())
  }

  async fn poll(&self, task_run_id: &str) -> Result<Option<TaskOutcome>, DispatchError> {
    let mut children = self.children.lock().await;
    let Some(state) = children.get_mut(task_run_id) else {
      return Err(DispatchError::UnknownTaskRun {
        task_run_id: task_run_id.to_string(),
      });
    };

    match state {
      ChildState::Done(outcome) => Ok(Some(outcome.clone())),
      ChildState::Running { child, run_dir } => {
        let status = child.try_wait().map_err(|e| DispatchError::Backend {
          message: format!("wait on child: {e}"),
        })?;
        match status {
          None => Ok(None),
          Some(status) => {
            let outcome = TaskOutcome {
              success: status.success(),
              exit_code: status.code(),
              message: (!status.success()).then(|| format!("command exited with {status}")),
              run_dir: Some(run_dir.clone()),
            };
            info!(
              task_run_id,
              success = outcome.success,
              exit_code = ?outcome.exit_code,
              "task_finished"
            );
            *state = ChildState::Done(outcome.clone());
            Ok(Some(outcome))
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use skein_model::{FileHandlerSettings, Step};
  use skein_storage::LocalFileHandler;

  use super::*;

  fn manager(file_root: &std::path::Path) -> LocalTaskManager {
    LocalTaskManager::new(Arc::new(LocalFileHandler::new(FileHandlerSettings::local(
      file_root.display().to_string(),
    ))))
  }

  fn step(command: &str) -> Step {
    Step {
      name: "s1".to_string(),
      command: command.to_string(),
      environment: Default::default(),
      resources: Default::default(),
      input_ports: vec![],
      output_ports: vec![],
    }
  }

  fn context(run_dir: PathBuf, command: &str) -> RunContext {
    RunContext {
      workflow_run_id: "wfr-1".to_string(),
      run_dir,
      inputs: vec![],
      command: command.to_string(),
      environment: Default::default(),
      resources: Default::default(),
    }
  }

  async fn poll_until_done(
    manager: &LocalTaskManager,
    task_run_id: &str,
  ) -> TaskOutcome {
    for _ in 0..200 {
      if let Some(outcome) = manager.poll(task_run_id).await.unwrap() {
        return outcome;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task did not finish in time");
  }

  #[tokio::test]
  async fn successful_command_reports_success_and_run_dir() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("runs").join("wfr-1").join("sr-1");
    let manager = manager(root.path());

    let command = "echo out > result.txt";
    let task_run = TaskRun::new("wfr-1", &step(command), vec![]);
    manager
      .run(&task_run, &context(run_dir.clone(), command))
      .await
      .unwrap();

    let outcome = poll_until_done(&manager, &task_run.id).await;
    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.run_dir.as_deref(), Some(run_dir.as_path()));
    assert!(run_dir.join("result.txt").exists());

    // Polling again after completion returns the cached outcome.
    let again = manager.poll(&task_run.id).await.unwrap().unwrap();
    assert!(again.success);
  }

  #[tokio::test]
  async fn failing_command_reports_exit_code() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("runs").join("wfr-1").join("sr-1");
    let manager = manager(root.path());

    let task_run = TaskRun::new("wfr-1", &step("exit 3"), vec![]);
    manager
      .run(&task_run, &context(run_dir, "exit 3"))
      .await
      .unwrap();

    let outcome = poll_until_done(&manager, &task_run.id).await;
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(3));
    assert!(outcome.message.is_some());
  }

  #[tokio::test]
  async fn double_dispatch_is_a_conflict() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("runs").join("wfr-1").join("sr-1");
    let manager = manager(root.path());

    let task_run = TaskRun::new("wfr-1", &step("sleep 5"), vec![]);
    manager
      .run(&task_run, &context(run_dir.clone(), "sleep 5"))
      .await
      .unwrap();
    let err = manager
      .run(&task_run, &context(run_dir, "sleep 5"))
      .await
      .unwrap_err();
    assert!(matches!(err, DispatchError::Conflict { .. }));
  }

  #[tokio::test]
  async fn environment_variables_reach_the_command() {
    let root = tempfile::tempdir().unwrap();
    let run_dir = root.path().join("runs").join("wfr-1").join("sr-1");
    let manager = manager(root.path());

    let command = "printf '%s' \"$GREETING\" > env.txt";
    let mut context = context(run_dir.clone(), command);
    context
      .environment
      .variables
      .insert("GREETING".to_string(), "hi".to_string());

    let task_run = TaskRun::new("wfr-1", &step(command), vec![]);
    manager.run(&task_run, &context).await.unwrap();
    let outcome = poll_until_done(&manager, &task_run.id).await;
    assert!(outcome.success);
    assert_eq!(std::fs::read_to_string(run_dir.join("env.txt")).unwrap(), "hi");
  }

  #[tokio::test]
  async fn polling_an_unknown_task_run_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let err = manager(root.path()).poll("never-dispatched").await.unwrap_err();
    assert!(matches!(err, DispatchError::UnknownTaskRun { .. }));
  }
}
