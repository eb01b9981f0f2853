//! Local-filesystem file handler.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use skein_model::{FileContents, FileHandlerSettings, StorageAddress, StorageLocation};

use crate::StorageError;
use crate::handler::{FileHandler, import_path, path_string, step_output_path};

/// Same-host storage: uploads copy, downloads hard-link where possible.
pub struct LocalFileHandler {
  settings: FileHandlerSettings,
}

impl LocalFileHandler {
  pub fn new(settings: FileHandlerSettings) -> Self {
    Self { settings }
  }

  fn local_path<'a>(&self, location: &'a StorageLocation) -> Result<&'a str, StorageError> {
    match &location.address {
      StorageAddress::LocalPath { file_path } => Ok(file_path),
      other => Err(StorageError::AddressMismatch {
        backend: "local",
        location: other.describe(),
      }),
    }
  }
}

#[async_trait]
impl FileHandler for LocalFileHandler {
  fn import_destination(
    &self,
    local_path: &Path,
    contents: &FileContents,
    file_id: &str,
  ) -> Result<StorageLocation, StorageError> {
    let path = import_path(
      &self.settings.file_root,
      &self.settings.import_dir,
      file_id,
      local_path,
    )?;
    Ok(StorageLocation {
      file_contents: contents.clone(),
      address: StorageAddress::LocalPath {
        file_path: path_string(&path),
      },
    })
  }

  fn step_output_destination(
    &self,
    local_path: &Path,
    contents: &FileContents,
  ) -> Result<StorageLocation, StorageError> {
    let path = step_output_path(&self.settings.file_root, local_path)?;
    Ok(StorageLocation {
      file_contents: contents.clone(),
      address: StorageAddress::LocalPath {
        file_path: path_string(&path),
      },
    })
  }

  async fn upload(
    &self,
    local_path: &Path,
    destination: &StorageLocation,
  ) -> Result<(), StorageError> {
    let destination_path = Path::new(self.local_path(destination)?);
    // The working directory may already be the destination.
    if local_path == destination_path {
      return Ok(());
    }
    if let Some(parent) = destination_path.parent() {
      fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;
    }
    fs::copy(local_path, destination_path)
      .await
      .map_err(|e| StorageError::io(destination_path, e))?;
    Ok(())
  }

  async fn download(
    &self,
    location: &StorageLocation,
    local_path: &Path,
  ) -> Result<(), StorageError> {
    let source_path = Path::new(self.local_path(location)?);
    if let Some(parent) = local_path.parent() {
      fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;
    }
    // Hard-link immutable content instead of copying; fall back to a copy
    // when the link fails (cross-device, unsupported filesystem).
    match fs::hard_link(source_path, local_path).await {
      Ok(()) => Ok(()),
      Err(link_error) => {
        debug!(
          source = %source_path.display(),
          target = %local_path.display(),
          error = %link_error,
          "hard link failed, copying instead"
        );
        fs::copy(source_path, local_path)
          .await
          .map_err(|e| StorageError::io(source_path, e))?;
        Ok(())
      }
    }
  }
}
