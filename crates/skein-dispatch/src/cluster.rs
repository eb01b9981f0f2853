//! Cluster task manager: forwards execution to a compute pool over ssh.
//!
//! The pool itself (provisioning, scheduling) is an opaque capability; this
//! backend only owns the submit/poll contract. Input staging assumes the
//! file server paths are mounted on the cluster hosts.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use skein_model::{StorageAddress, TaskRun};

use crate::manager::{RunContext, TaskManager, TaskOutcome};
use crate::DispatchError;

enum RemoteState {
  Running(Child),
  Done(TaskOutcome),
}

/// Submits each task over a secure channel to a remote compute host.
pub struct ClusterTaskManager {
  host: String,
  submissions: Mutex<HashMap<String, RemoteState>>,
}

impl ClusterTaskManager {
  pub fn new(host: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      submissions: Mutex::new(HashMap::new()),
    }
  }

  /// Remote shell script: create the run directory, link inputs from their
  /// shared-filesystem locations, then run the step command.
  fn remote_script(context: &RunContext) -> Result<String, DispatchError> {
    let run_dir = context.run_dir.display();
    let mut script = format!("mkdir -p '{run_dir}' && cd '{run_dir}'");
    for input in &context.inputs {
      let source = match &input.location.address {
        StorageAddress::Server { file_path, .. }
        | StorageAddress::LocalPath { file_path } => file_path.clone(),
        StorageAddress::Cloud { .. } => {
          return Err(DispatchError::Backend {
            message: "cluster backend cannot stage cloud locations".to_string(),
          });
        }
      };
      script.push_str(&format!(" && ln -f '{source}' '{}'", input.file_path));
    }
    for (key, value) in &context.environment.variables {
      script.push_str(&format!(" && export {key}='{value}'"));
    }
    script.push_str(&format!(" && {}", context.command));
    Ok(script)
  }
}

#[async_trait]
impl TaskManager for ClusterTaskManager {
  #[instrument(
    name = "cluster_dispatch",
    skip(self, task_run, context),
    fields(task_run_id = %task_run.id, host = %self.host)
  )]
  async fn run(&self, task_run: &TaskRun, context: &RunContext) -> Result<(), DispatchError> {
    {
      let submissions = self.submissions.lock().await;
      if submissions.contains_key(&task_run.id) {
        return Err(DispatchError::Conflict {
          task_run_id: task_run.id.clone(),
        });
      }
    }

    let script = Self::remote_script(context)?;
    let child = Command::new("ssh")
      .arg(&self.host)
      .arg(script)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| DispatchError::Launch {
        message: format!("spawn ssh: {e}"),
      })?;

    info!(step = %task_run.step_name, "task_submitted");
    let mut submissions = self.submissions.lock().await;
    submissions.insert(task_run.id.clone(), RemoteState::Running(child));
    Ok(())
  }

  async fn poll(&self, task_run_id: &str) -> Result<Option<TaskOutcome>, DispatchError> {
    let mut submissions = self.submissions.lock().await;
    let Some(state) = submissions.get_mut(task_run_id) else {
      return Err(DispatchError::UnknownTaskRun {
        task_run_id: task_run_id.to_string(),
      });
    };

    match state {
      RemoteState::Done(outcome) => Ok(Some(outcome.clone())),
      RemoteState::Running(child) => {
        let status = child.try_wait().map_err(|e| DispatchError::Backend {
          message: format!("wait on ssh: {e}"),
        })?;
        match status {
          None => Ok(None),
          Some(status) => {
            // The run directory lives on the cluster, not here; outputs are
            // registered by the remote worker.
            let outcome = TaskOutcome {
              success: status.success(),
              exit_code: status.code(),
              message: (!status.success())
                .then(|| format!("remote command exited with {status}")),
              run_dir: None,
            };
            *state = RemoteState::Done(outcome.clone());
            Ok(Some(outcome))
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use skein_model::{FileContents, HashFunction, StorageLocation};

  use super::*;
  use crate::manager::StagedInput;

  #[test]
  fn remote_script_links_inputs_and_runs_the_command() {
    let context = RunContext {
      workflow_run_id: "wfr".to_string(),
      run_dir: PathBuf::from("/work/runs/wfr/sr"),
      inputs: vec![StagedInput {
        file_path: "in.txt".to_string(),
        location: StorageLocation {
          file_contents: FileContents {
            hash_function: HashFunction::Md5,
            hash_value: "aa".to_string(),
          },
          address: StorageAddress::Server {
            host_url: "files".to_string(),
            file_path: "/srv/files/imported_files/x_in.txt".to_string(),
          },
        },
      }],
      command: "wc -l in.txt > count.txt".to_string(),
      environment: Default::default(),
      resources: Default::default(),
    };

    let script = ClusterTaskManager::remote_script(&context).unwrap();
    assert!(script.starts_with("mkdir -p '/work/runs/wfr/sr'"));
    assert!(script.contains("ln -f '/srv/files/imported_files/x_in.txt' 'in.txt'"));
    assert!(script.ends_with("&& wc -l in.txt > count.txt"));
  }

  #[test]
  fn cloud_locations_cannot_be_staged() {
    let context = RunContext {
      workflow_run_id: "wfr".to_string(),
      run_dir: PathBuf::from("/work/runs/wfr/sr"),
      inputs: vec![StagedInput {
        file_path: "in.txt".to_string(),
        location: StorageLocation {
          file_contents: FileContents {
            hash_function: HashFunction::Md5,
            hash_value: "aa".to_string(),
          },
          address: StorageAddress::Cloud {
            project_id: "p".to_string(),
            bucket_id: "b".to_string(),
            blob_path: "k".to_string(),
          },
        },
      }],
      command: "true".to_string(),
      environment: Default::default(),
      resources: Default::default(),
    };
    assert!(ClusterTaskManager::remote_script(&context).is_err());
  }
}
