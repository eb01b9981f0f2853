//! Server-reported configuration consumed by clients and workers.
//!
//! Components receive these structs explicitly at construction; they are
//! fetched once from the coordinating service at process start, never read
//! from ambient global state.

use serde::{Deserialize, Serialize};

use crate::data_object::HashFunction;

/// Storage backend kinds the file handler factory can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileBackend {
  Local,
  Remote,
  Cloud,
}

/// Compute backend kinds the task manager factory can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerBackend {
  Local,
  Cluster,
  Cloud,
  Dummy,
}

/// Everything a file handler needs to place and fetch bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHandlerSettings {
  pub hash_function: HashFunction,
  pub backend: FileBackend,
  /// Root under which imports and step outputs are placed.
  pub file_root: String,
  /// Directory name for imports, under `file_root`.
  #[serde(default = "default_import_dir")]
  pub import_dir: String,
  /// File server address workers reach storage through.
  pub host_url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bucket_id: Option<String>,
  /// Endpoint override for S3-compatible object stores.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub endpoint: Option<String>,
}

fn default_import_dir() -> String {
  "imported_files".to_string()
}

impl FileHandlerSettings {
  /// Local-filesystem settings rooted at `file_root`, with the default
  /// import directory and md5 content hashing.
  pub fn local(file_root: impl Into<String>) -> Self {
    Self {
      hash_function: HashFunction::Md5,
      backend: FileBackend::Local,
      file_root: file_root.into(),
      import_dir: default_import_dir(),
      host_url: "localhost".to_string(),
      project_id: None,
      bucket_id: None,
      endpoint: None,
    }
  }
}

/// Everything a task manager needs to execute units of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
  pub backend: WorkerBackend,
  /// Root of per-run working directories.
  pub working_dir: String,
  /// Host the cluster backend submits over ssh to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cluster_host: Option<String>,
  /// Job submission endpoint for the cloud backend.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cloud_endpoint: Option<String>,
}

impl WorkerSettings {
  pub fn local(working_dir: impl Into<String>) -> Self {
    Self {
      backend: WorkerBackend::Local,
      working_dir: working_dir.into(),
      cluster_host: None,
      cloud_endpoint: None,
    }
  }
}

/// Service identification returned by the info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
  pub version: String,
}
