//! The reconciliation tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use skein_dispatch::{DispatchError, RunContext, StagedInput, TaskManager};
use skein_model::{
  Binding, DataObject, FileDataObject, HashFunction, RunStatus, Step, StepRun, TaskRun,
  WorkflowRun,
};
use skein_storage::{FileHandler, hash_file};
use skein_store::{AvailabilitySnapshot, ObjectStore, Store};

use crate::ReconcileError;

/// What one tick advanced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
  pub tasks_dispatched: usize,
  pub tasks_completed: usize,
  pub tasks_failed: usize,
  pub workflow_runs_completed: usize,
  pub workflow_runs_failed: usize,
}

impl TickReport {
  pub fn is_quiet(&self) -> bool {
    *self == Self::default()
  }
}

enum ContextResolution {
  Ready(RunContext),
  /// The task can never run as bound; carries the failure message.
  Unusable(String),
}

enum OutputRegistration {
  Registered(Vec<Binding>),
  Failed(String),
}

/// Advances run state machines: dispatches newly runnable tasks, observes
/// backend completions, and reduces workflow run status over step runs.
///
/// Safe to invoke repeatedly and concurrently. Task runs have deterministic
/// ids per (workflow run, step) and every status change is a conditional
/// transition in the store, so overlapping ticks advance each transition
/// exactly once.
pub struct Reconciler {
  store: Arc<dyn Store>,
  manager: Arc<dyn TaskManager>,
  handler: Arc<dyn FileHandler>,
  hash_function: HashFunction,
  working_dir: PathBuf,
}

impl Reconciler {
  pub fn new(
    store: Arc<dyn Store>,
    manager: Arc<dyn TaskManager>,
    handler: Arc<dyn FileHandler>,
    hash_function: HashFunction,
    working_dir: impl Into<PathBuf>,
  ) -> Self {
    Self {
      store,
      manager,
      handler,
      hash_function,
      working_dir: working_dir.into(),
    }
  }

  /// One reconciliation pass.
  #[instrument(name = "reconcile_tick", skip(self))]
  pub async fn tick(&self) -> Result<TickReport, ReconcileError> {
    let mut report = TickReport::default();
    self.dispatch_runnable(&mut report).await?;
    self.observe_completions(&mut report).await?;
    self.reduce_workflow_runs(&mut report).await?;
    Ok(report)
  }

  /// Phase one: create and dispatch task runs whose inputs are all bound
  /// and available.
  async fn dispatch_runnable(&self, report: &mut TickReport) -> Result<(), ReconcileError> {
    // Built fresh each pass so newly registered locations are observed.
    let snapshot = self.store.availability().await?;

    for stored in self.store.workflow_runs(None).await? {
      let workflow_run = stored.object;
      if workflow_run.status.is_terminal() {
        continue;
      }

      for step in &workflow_run.workflow.steps {
        let task_run_id = TaskRun::id_for(&workflow_run.id, &step.name);
        if self.store.task_run(&task_run_id).await?.is_some() {
          continue;
        }

        let Some(bindings) = self.resolve_bindings(&workflow_run, step).await? else {
          continue;
        };
        if !self.all_available(&bindings, &snapshot).await? {
          continue;
        }

        let task_run = TaskRun::new(&workflow_run.id, step, bindings);
        self.store.add_task_run(&task_run).await?;
        // The dispatch guard: exactly one pass wins the pending -> running
        // claim, no matter how many run concurrently.
        if !self.store.claim_task_run(&task_run.id).await? {
          continue;
        }
        let _ = self
          .store
          .mark_workflow_run(&workflow_run.id, RunStatus::Pending, RunStatus::Running)
          .await?;

        match self.run_context(&workflow_run, step, &task_run).await? {
          ContextResolution::Unusable(message) => {
            self.fail_task_run(&task_run.id, message, report).await?;
          }
          ContextResolution::Ready(context) => match self.manager.run(&task_run, &context).await {
            Ok(()) => {
              report.tasks_dispatched += 1;
              info!(
                task_run_id = %task_run.id,
                workflow_run_id = %workflow_run.id,
                step = %step.name,
                "task_dispatched"
              );
            }
            Err(DispatchError::Conflict { .. }) => {
              // A concurrent pass already handed this unit to the backend.
              warn!(task_run_id = %task_run.id, "dispatch_conflict");
            }
            Err(e) => {
              self
                .fail_task_run(&task_run.id, format!("dispatch failed: {e}"), report)
                .await?;
            }
          },
        }
      }
    }
    Ok(())
  }

  /// Phase two: collect backend-reported completions.
  async fn observe_completions(&self, report: &mut TickReport) -> Result<(), ReconcileError> {
    for stored in self.store.task_runs().await? {
      let mut task_run = stored.object;
      if task_run.status != RunStatus::Running {
        continue;
      }

      let outcome = match self.manager.poll(&task_run.id).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => continue,
        Err(e) => {
          // The repeating tick polls again; no retry happens here.
          warn!(task_run_id = %task_run.id, error = %e, "poll_failed");
          continue;
        }
      };

      if !outcome.success {
        let message = outcome
          .message
          .unwrap_or_else(|| "backend reported failure".to_string());
        self.fail_task_run(&task_run.id, message, report).await?;
        continue;
      }

      let registration = match &outcome.run_dir {
        Some(run_dir) => self.register_outputs(&task_run, run_dir).await?,
        // Remote backends registered their outputs themselves.
        None => OutputRegistration::Registered(Vec::new()),
      };

      match registration {
        OutputRegistration::Failed(message) => {
          self.fail_task_run(&task_run.id, message, report).await?;
        }
        OutputRegistration::Registered(output_bindings) => {
          if self
            .store
            .mark_task_run(&task_run.id, RunStatus::Running, RunStatus::Complete)
            .await?
          {
            task_run.status = RunStatus::Complete;
            task_run.output_bindings = output_bindings;
            task_run.finished_at = Some(Utc::now());
            self.store.save_task_run(&task_run).await?;
            report.tasks_completed += 1;
            info!(
              task_run_id = %task_run.id,
              step = %task_run.step_name,
              "task_completed"
            );
          }
        }
      }
    }
    Ok(())
  }

  /// Phase three: recompute workflow run status as a reduction over its
  /// step runs.
  async fn reduce_workflow_runs(&self, report: &mut TickReport) -> Result<(), ReconcileError> {
    for stored in self.store.workflow_runs(None).await? {
      let mut workflow_run = stored.object;
      if workflow_run.status.is_terminal() {
        continue;
      }

      let mut derived = Vec::with_capacity(workflow_run.workflow.steps.len());
      let mut any_failed = false;
      let mut all_complete = true;
      for step in &workflow_run.workflow.steps {
        let task_run_id = TaskRun::id_for(&workflow_run.id, &step.name);
        let (status, task_run_id) = match self.store.task_run(&task_run_id).await? {
          Some(task_run) => (task_run.status, Some(task_run_id)),
          None => (RunStatus::Pending, None),
        };
        any_failed |= status == RunStatus::Failed;
        all_complete &= status == RunStatus::Complete;
        derived.push(StepRun {
          step_name: step.name.clone(),
          status,
          task_run_id,
        });
      }

      if any_failed {
        if self.store.fail_workflow_run(&workflow_run.id).await? {
          workflow_run.status = RunStatus::Failed;
          workflow_run.step_runs = derived;
          workflow_run.finished_at = Some(Utc::now());
          self.store.save_workflow_run(&workflow_run).await?;
          report.workflow_runs_failed += 1;
          info!(workflow_run_id = %workflow_run.id, "workflow_run_failed");
        }
      } else if all_complete {
        // A zero-step or all-complete run may still be pending.
        let _ = self
          .store
          .mark_workflow_run(&workflow_run.id, RunStatus::Pending, RunStatus::Running)
          .await?;
        if self
          .store
          .mark_workflow_run(&workflow_run.id, RunStatus::Running, RunStatus::Complete)
          .await?
        {
          workflow_run.status = RunStatus::Complete;
          workflow_run.step_runs = derived;
          workflow_run.finished_at = Some(Utc::now());
          self.store.save_workflow_run(&workflow_run).await?;
          report.workflow_runs_completed += 1;
          info!(workflow_run_id = %workflow_run.id, "workflow_run_completed");
        }
      } else if workflow_run.step_runs != derived {
        workflow_run.step_runs = derived;
        self.store.save_workflow_run(&workflow_run).await?;
      }
    }
    Ok(())
  }

  /// Resolve every input port of `step` to a data object id, from the run
  /// request's channels and from upstream output bindings through data
  /// pipes. `None` while any port is still unbound.
  async fn resolve_bindings(
    &self,
    workflow_run: &WorkflowRun,
    step: &Step,
  ) -> Result<Option<Vec<Binding>>, ReconcileError> {
    let workflow = &workflow_run.workflow;
    let mut bindings = Vec::with_capacity(step.input_ports.len());

    for port in &step.input_ports {
      let via_channel = workflow
        .inputs
        .iter()
        .find(|input| input.destination.step == step.name && input.destination.port == port.name)
        .and_then(|input| {
          workflow_run
            .inputs
            .iter()
            .find(|assigned| assigned.channel == input.channel)
        })
        .map(|assigned| assigned.data_object_id.clone());

      let data_object_id = match via_channel {
        Some(id) => Some(id),
        None => self.resolve_pipe(workflow_run, step, &port.name).await?,
      };

      match data_object_id {
        Some(id) => bindings.push(Binding {
          port: port.name.clone(),
          data_object_id: id,
        }),
        None => return Ok(None),
      }
    }
    Ok(Some(bindings))
  }

  /// Follow the data pipe feeding (step, port), if the upstream task run
  /// has completed and bound that output.
  async fn resolve_pipe(
    &self,
    workflow_run: &WorkflowRun,
    step: &Step,
    port_name: &str,
  ) -> Result<Option<String>, ReconcileError> {
    let Some(pipe) = workflow_run.workflow.data_pipes.iter().find(|pipe| {
      pipe.destination.step == step.name && pipe.destination.port == port_name
    }) else {
      return Ok(None);
    };

    let upstream_id = TaskRun::id_for(&workflow_run.id, &pipe.source.step);
    let Some(upstream) = self.store.task_run(&upstream_id).await? else {
      return Ok(None);
    };
    if upstream.status != RunStatus::Complete {
      return Ok(None);
    }
    Ok(
      upstream
        .output_bindings
        .iter()
        .find(|binding| binding.port == pipe.source.port)
        .map(|binding| binding.data_object_id.clone()),
    )
  }

  async fn all_available(
    &self,
    bindings: &[Binding],
    snapshot: &AvailabilitySnapshot,
  ) -> Result<bool, ReconcileError> {
    for binding in bindings {
      match self.store.data_object(&binding.data_object_id).await? {
        Some(object) if object.is_available(snapshot) => {}
        _ => return Ok(false),
      }
    }
    Ok(true)
  }

  /// Stage the claimed task run's execution context: resolve each input
  /// binding to a concrete storage location and pick the run directory.
  async fn run_context(
    &self,
    workflow_run: &WorkflowRun,
    step: &Step,
    task_run: &TaskRun,
  ) -> Result<ContextResolution, ReconcileError> {
    let mut inputs = Vec::with_capacity(task_run.input_bindings.len());
    for binding in &task_run.input_bindings {
      let Some(port) = step.input_port(&binding.port) else {
        return Ok(ContextResolution::Unusable(format!(
          "step '{}' has no input port '{}'",
          step.name, binding.port
        )));
      };
      let Some(object) = self.store.data_object(&binding.data_object_id).await? else {
        return Ok(ContextResolution::Unusable(format!(
          "data object {} is not registered",
          binding.data_object_id
        )));
      };
      let DataObject::File(file) = object else {
        return Ok(ContextResolution::Unusable(format!(
          "port '{}' requires a file data object",
          binding.port
        )));
      };
      let locations = self.store.locations_for(&file.file_contents).await?;
      let Some(location) = locations.into_iter().next() else {
        return Ok(ContextResolution::Unusable(format!(
          "no storage location registered for '{}'",
          file.file_name
        )));
      };
      inputs.push(StagedInput {
        file_path: port.file_path.clone(),
        location: location.object,
      });
    }

    let run_dir = self.working_dir.join(&workflow_run.id).join(&task_run.id);
    Ok(ContextResolution::Ready(RunContext {
      workflow_run_id: workflow_run.id.clone(),
      run_dir,
      inputs,
      command: step.command.clone(),
      environment: step.environment.clone(),
      resources: step.resources.clone(),
    }))
  }

  /// Hash, upload, and register each declared output of a finished task.
  ///
  /// Registration is idempotent: objects and locations are content-keyed,
  /// so a concurrent pass that loses the completion claim leaves no extra
  /// records behind.
  async fn register_outputs(
    &self,
    task_run: &TaskRun,
    run_dir: &Path,
  ) -> Result<OutputRegistration, ReconcileError> {
    let mut bindings = Vec::with_capacity(task_run.step.output_ports.len());
    for port in &task_run.step.output_ports {
      let local_path = run_dir.join(&port.file_path);
      let contents = match hash_file(&local_path, self.hash_function).await {
        Ok(contents) => contents,
        Err(e) => {
          return Ok(OutputRegistration::Failed(format!(
            "missing or unreadable output '{}': {e}",
            port.file_path
          )));
        }
      };

      let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| port.file_path.clone());
      let object = DataObject::File(FileDataObject {
        file_name,
        file_contents: contents.clone(),
        metadata: Default::default(),
      });
      let object_id = self.store.register_data_object(&object).await?;

      let destination = match self.handler.step_output_destination(&local_path, &contents) {
        Ok(destination) => destination,
        Err(e) => {
          return Ok(OutputRegistration::Failed(format!(
            "cannot derive destination for output '{}': {e}",
            port.file_path
          )));
        }
      };
      if let Err(e) = self.handler.upload(&local_path, &destination).await {
        return Ok(OutputRegistration::Failed(format!(
          "upload of output '{}' failed: {e}",
          port.file_path
        )));
      }
      self.store.add_location(&destination).await?;

      bindings.push(Binding {
        port: port.name.clone(),
        data_object_id: object_id,
      });
    }
    Ok(OutputRegistration::Registered(bindings))
  }

  /// Fail a running task run, once.
  async fn fail_task_run(
    &self,
    task_run_id: &str,
    message: String,
    report: &mut TickReport,
  ) -> Result<(), ReconcileError> {
    if !self
      .store
      .mark_task_run(task_run_id, RunStatus::Running, RunStatus::Failed)
      .await?
    {
      return Ok(());
    }
    if let Some(mut task_run) = self.store.task_run(task_run_id).await? {
      task_run.status = RunStatus::Failed;
      task_run.message = Some(message.clone());
      task_run.finished_at = Some(Utc::now());
      self.store.save_task_run(&task_run).await?;
    }
    warn!(task_run_id, message = %message, "task_failed");
    report.tasks_failed += 1;
    Ok(())
  }
}
