//! Storage locations: where a given file contents can be fetched from.

use serde::{Deserialize, Serialize};

use crate::data_object::FileContents;

/// A backend-specific address for a set of file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageAddress {
  /// A path on the orchestrator's own filesystem.
  LocalPath { file_path: String },
  /// A path on a file server reachable over ssh.
  Server { host_url: String, file_path: String },
  /// An object in cloud object storage.
  Cloud {
    project_id: String,
    bucket_id: String,
    blob_path: String,
  },
}

impl StorageAddress {
  /// Human-readable rendering for logs and CLI output.
  pub fn describe(&self) -> String {
    match self {
      Self::LocalPath { file_path } => file_path.clone(),
      Self::Server { host_url, file_path } => format!("{host_url}:{file_path}"),
      Self::Cloud {
        bucket_id,
        blob_path,
        ..
      } => format!("{bucket_id}/{blob_path}"),
    }
  }
}

/// A registered place where one file contents can be fetched.
///
/// Always tied to exactly one [`FileContents`]; a contents record may have
/// any number of locations, and locations outlive the data object whose
/// import first created them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
  pub file_contents: FileContents,
  #[serde(flatten)]
  pub address: StorageAddress,
}
