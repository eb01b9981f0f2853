//! Dummy task manager: no real work, driven by the caller.
//!
//! Exists to exercise the reconciliation loop in isolation. Every dispatch
//! is recorded; outcomes either auto-succeed or are scripted by a test
//! harness through [`DummyTaskManager::complete`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use skein_model::TaskRun;

use crate::manager::{RunContext, TaskManager, TaskOutcome};
use crate::DispatchError;

#[derive(Default)]
struct DummyState {
  dispatched: Vec<String>,
  outcomes: HashMap<String, TaskOutcome>,
}

/// Records dispatches and serves canned outcomes.
pub struct DummyTaskManager {
  auto_succeed: bool,
  state: Mutex<DummyState>,
}

impl DummyTaskManager {
  /// A dummy whose tasks stay running until the harness completes them.
  pub fn new() -> Self {
    Self {
      auto_succeed: false,
      state: Mutex::new(DummyState::default()),
    }
  }

  /// A dummy whose tasks succeed on the first poll after dispatch.
  pub fn succeeding() -> Self {
    Self {
      auto_succeed: true,
      state: Mutex::new(DummyState::default()),
    }
  }

  /// Number of dispatches observed so far.
  pub async fn dispatch_count(&self) -> usize {
    self.state.lock().await.dispatched.len()
  }

  /// Task run ids in dispatch order.
  pub async fn dispatched(&self) -> Vec<String> {
    self.state.lock().await.dispatched.clone()
  }

  /// Script the outcome the next poll of `task_run_id` reports.
  pub async fn complete(&self, task_run_id: &str, outcome: TaskOutcome) {
    let mut state = self.state.lock().await;
    state.outcomes.insert(task_run_id.to_string(), outcome);
  }
}

impl Default for DummyTaskManager {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl TaskManager for DummyTaskManager {
  async fn run(&self, task_run: &TaskRun, _context: &RunContext) -> Result<(), DispatchError> {
    let mut state = self.state.lock().await;
    if state.dispatched.iter().any(|id| id == &task_run.id) {
      return Err(DispatchError::Conflict {
        task_run_id: task_run.id.clone(),
      });
    }
    debug!(task_run_id = %task_run.id, "dummy dispatch");
    state.dispatched.push(task_run.id.clone());
    Ok(())
  }

  async fn poll(&self, task_run_id: &str) -> Result<Option<TaskOutcome>, DispatchError> {
    let state = self.state.lock().await;
    if !state.dispatched.iter().any(|id| id == task_run_id) {
      return Err(DispatchError::UnknownTaskRun {
        task_run_id: task_run_id.to_string(),
      });
    }
    if let Some(outcome) = state.outcomes.get(task_run_id) {
      return Ok(Some(outcome.clone()));
    }
    if self.auto_succeed {
      return Ok(Some(TaskOutcome::succeeded(None)));
    }
    Ok(None)
  }
}
