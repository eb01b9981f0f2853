//! Skein Dispatch
//!
//! Task execution backends. A [`TaskManager`] accepts a claimed task run
//! plus its prepared run context and begins execution on its substrate; the
//! reconciler later observes completion through [`TaskManager::poll`].
//!
//! The backend is selected once at process startup from worker settings.
//! Dispatch is guarded upstream by the store's atomic `pending -> running`
//! claim; managers additionally refuse an id they are already tracking with
//! [`DispatchError::Conflict`], which callers treat as a no-op.

mod cloud;
mod cluster;
mod dummy;
mod error;
mod local;
mod manager;

pub use cloud::CloudTaskManager;
pub use cluster::ClusterTaskManager;
pub use dummy::DummyTaskManager;
pub use error::DispatchError;
pub use local::LocalTaskManager;
pub use manager::{RunContext, StagedInput, TaskManager, TaskOutcome};

use std::sync::Arc;

use skein_model::{WorkerBackend, WorkerSettings};
use skein_storage::FileHandler;

/// Build the task manager the settings call for. Misconfiguration is fatal
/// at startup, not recoverable per call.
pub fn task_manager_for(
  settings: &WorkerSettings,
  handler: Arc<dyn FileHandler>,
) -> Result<Arc<dyn TaskManager>, DispatchError> {
  match settings.backend {
    WorkerBackend::Local => Ok(Arc::new(LocalTaskManager::new(handler))),
    WorkerBackend::Cluster => {
      let host = settings.cluster_host.clone().ok_or_else(|| {
        DispatchError::Misconfigured {
          message: "cluster_host is required for the cluster backend".to_string(),
        }
      })?;
      Ok(Arc::new(ClusterTaskManager::new(host)))
    }
    WorkerBackend::Cloud => {
      let endpoint = settings.cloud_endpoint.clone().ok_or_else(|| {
        DispatchError::Misconfigured {
          message: "cloud_endpoint is required for the cloud backend".to_string(),
        }
      })?;
      Ok(Arc::new(CloudTaskManager::new(endpoint)))
    }
    WorkerBackend::Dummy => Ok(Arc::new(DummyTaskManager::succeeding())),
  }
}

/// Parse a worker backend name from configuration text.
pub fn parse_worker_backend(name: &str) -> Result<WorkerBackend, DispatchError> {
  match name.to_ascii_lowercase().as_str() {
    "local" => Ok(WorkerBackend::Local),
    "cluster" => Ok(WorkerBackend::Cluster),
    "cloud" => Ok(WorkerBackend::Cloud),
    "dummy" => Ok(WorkerBackend::Dummy),
    _ => Err(DispatchError::UnsupportedBackend {
      name: name.to_string(),
    }),
  }
}
