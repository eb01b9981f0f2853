//! Provenance records for imported data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::StorageLocation;

/// Records one import of a file: where it came from and where it was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImport {
  pub file_data_object_id: String,
  /// Path on the importing host the bytes were read from.
  pub source_path: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
  pub destination: StorageLocation,
  pub imported_at: DateTime<Utc>,
}

/// Free-text description of where a set of data objects came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceRecord {
  pub data_object_ids: Vec<String>,
  pub source_description: String,
}
