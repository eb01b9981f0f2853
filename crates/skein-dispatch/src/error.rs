use thiserror::Error;

/// Errors surfaced by task dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
  /// Configuration named an execution backend with no registered strategy.
  #[error("unsupported worker backend '{name}'")]
  UnsupportedBackend { name: String },

  /// The worker settings are incomplete for the selected strategy.
  #[error("misconfigured worker backend: {message}")]
  Misconfigured { message: String },

  /// The task run is already being tracked: a reconciliation race tried to
  /// dispatch it twice. Callers must treat this as a no-op.
  #[error("task run {task_run_id} is already dispatched")]
  Conflict { task_run_id: String },

  /// A poll named a task run this manager never dispatched.
  #[error("unknown task run {task_run_id}")]
  UnknownTaskRun { task_run_id: String },

  /// The execution unit could not be launched.
  #[error("failed to launch task: {message}")]
  Launch { message: String },

  /// The cloud job endpoint rejected a submission.
  #[error("job submission failed with status {status}: {body}")]
  Submit { status: u16, body: String },

  /// The backend reported an error outside the submit/poll contract.
  #[error("backend error: {message}")]
  Backend { message: String },

  /// Staging input files in or out of the run directory failed.
  #[error(transparent)]
  Storage(#[from] skein_storage::StorageError),
}
