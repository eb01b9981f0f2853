//! The file handler boundary and the path conventions all backends share.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use skein_model::{FileContents, StorageLocation};

use crate::StorageError;

/// Moves bytes between the local filesystem and one storage backend.
///
/// Destination computation is deterministic so that anything placed by one
/// process can be found by another from the path convention alone. Handlers
/// never retry; callers own retry policy.
#[async_trait]
pub trait FileHandler: Send + Sync {
  /// Destination for an imported file: under the configured import
  /// directory, named by import time, the first characters of the assigned
  /// file id, and the original base filename. Importing the same bytes
  /// twice yields two distinct destinations.
  fn import_destination(
    &self,
    local_path: &Path,
    contents: &FileContents,
    file_id: &str,
  ) -> Result<StorageLocation, StorageError>;

  /// Destination for a step output: mirrors the run directory hierarchy
  /// (runs directory / workflow run / step run / filename) under the
  /// configured file root.
  fn step_output_destination(
    &self,
    local_path: &Path,
    contents: &FileContents,
  ) -> Result<StorageLocation, StorageError>;

  /// Materialize local bytes at the destination.
  async fn upload(
    &self,
    local_path: &Path,
    destination: &StorageLocation,
  ) -> Result<(), StorageError>;

  /// Materialize the location's bytes at a local path.
  async fn download(
    &self,
    location: &StorageLocation,
    local_path: &Path,
  ) -> Result<(), StorageError>;
}

/// `<file_root>/<import_dir>/<timestamp>_<short id>_<basename>`
pub(crate) fn import_path(
  file_root: &str,
  import_dir: &str,
  file_id: &str,
  local_path: &Path,
) -> Result<PathBuf, StorageError> {
  let base_name = file_name_of(local_path)?;
  let timestamp = Utc::now().format("%Y%m%d-%Hh%Mm%Ss");
  let short_id: String = file_id.chars().take(10).collect();
  Ok(
    PathBuf::from(file_root)
      .join(import_dir)
      .join(format!("{timestamp}_{short_id}_{base_name}")),
  )
}

/// Mirror the last four components of a run-directory path under the file
/// root: `<runs dir>/<workflow run>/<step run>/<filename>`.
pub(crate) fn step_output_path(
  file_root: &str,
  local_path: &Path,
) -> Result<PathBuf, StorageError> {
  let file_name = file_name_of(local_path)?;
  let mut ancestors = local_path.ancestors().skip(1);
  let mut dirs = Vec::new();
  for level in ["step run", "workflow run", "runs"] {
    let dir = ancestors
      .next()
      .and_then(|p| p.file_name())
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| StorageError::InvalidPath {
        path: local_path.display().to_string(),
        message: format!("no {level} directory above the output file"),
      })?;
    dirs.push(dir);
  }
  Ok(
    PathBuf::from(file_root)
      .join(&dirs[2])
      .join(&dirs[1])
      .join(&dirs[0])
      .join(file_name),
  )
}

pub(crate) fn file_name_of(path: &Path) -> Result<String, StorageError> {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| StorageError::InvalidPath {
      path: path.display().to_string(),
      message: "path has no file name".to_string(),
    })
}

pub(crate) fn path_string(path: &Path) -> String {
  path.display().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn import_path_embeds_short_id_and_basename() {
    let path = import_path(
      "/data",
      "imported_files",
      "0123456789abcdef",
      Path::new("/home/user/sample.fastq"),
    )
    .unwrap();
    let text = path.display().to_string();
    assert!(text.starts_with("/data/imported_files/"));
    assert!(text.ends_with("_0123456789_sample.fastq"));
  }

  #[test]
  fn step_output_path_mirrors_run_hierarchy() {
    let path = step_output_path(
      "/data",
      Path::new("/work/runs/wfr-1/sr-1/out.txt"),
    )
    .unwrap();
    assert_eq!(path, PathBuf::from("/data/runs/wfr-1/sr-1/out.txt"));
  }

  #[test]
  fn shallow_output_path_is_rejected() {
    let err = step_output_path("/data", Path::new("/out.txt")).unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath { .. }));
  }
}
