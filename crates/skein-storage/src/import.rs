//! The import and export protocols over the coordinating service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use skein_client::ApiClient;
use skein_model::{
  DataObject, DataSourceRecord, FileDataObject, FileImport, HashFunction, StorageLocation,
};

use crate::handler::{FileHandler, file_name_of};
use crate::{StorageError, hash_file};

/// Everything an import produced.
#[derive(Debug)]
pub struct ImportedFile {
  pub file_id: String,
  pub location_id: String,
  pub object: DataObject,
  pub destination: StorageLocation,
}

/// Imports local files: registers identity, places bytes, records the
/// storage location and provenance.
pub struct FileImporter {
  client: ApiClient,
  handler: Arc<dyn FileHandler>,
  hash_function: HashFunction,
}

impl FileImporter {
  pub fn new(client: ApiClient, handler: Arc<dyn FileHandler>, hash_function: HashFunction) -> Self {
    Self {
      client,
      handler,
      hash_function,
    }
  }

  /// Import one file.
  ///
  /// This is a two-phase protocol: the identity must be registered before
  /// the bytes are placed, because the destination path embeds the assigned
  /// id. Registering identical content reuses the existing record, but the
  /// upload always lands at a fresh timestamped destination and registers a
  /// new storage location.
  #[instrument(skip_all, fields(path = %local_path.display()))]
  pub async fn import_file(
    &self,
    local_path: &Path,
    note: Option<&str>,
  ) -> Result<ImportedFile, StorageError> {
    let contents = hash_file(local_path, self.hash_function).await?;
    let object = DataObject::File(FileDataObject {
      file_name: file_name_of(local_path)?,
      file_contents: contents.clone(),
      metadata: Default::default(),
    });

    // Phase one: identity.
    let (file_id, object) = self.client.post_data_object(&object).await?;

    // Phase two: placement.
    let destination = self
      .handler
      .import_destination(local_path, &contents, &file_id)?;
    self.handler.upload(local_path, &destination).await?;
    let (location_id, _) = self.client.post_file_storage_location(&destination).await?;

    let import = FileImport {
      file_data_object_id: file_id.clone(),
      source_path: local_path.display().to_string(),
      note: note.map(str::to_string),
      destination: destination.clone(),
      imported_at: Utc::now(),
    };
    self.client.post_file_import(&import).await?;

    info!(
      file_id = %file_id,
      destination = %destination.address.describe(),
      "file_imported"
    );
    Ok(ImportedFile {
      file_id,
      location_id,
      object,
      destination,
    })
  }

  /// Import several files under one note. A given note also becomes one
  /// data source record covering everything it imported.
  pub async fn import_files(
    &self,
    local_paths: &[PathBuf],
    note: Option<&str>,
  ) -> Result<Vec<ImportedFile>, StorageError> {
    let mut imported = Vec::with_capacity(local_paths.len());
    for path in local_paths {
      imported.push(self.import_file(path, note).await?);
    }
    if let Some(description) = note {
      let record = DataSourceRecord {
        data_object_ids: imported.iter().map(|i| i.file_id.clone()).collect(),
        source_description: description.to_string(),
      };
      self.client.post_data_source_record(&record).await?;
    }
    Ok(imported)
  }
}

/// Fetches a registered file to the local filesystem.
pub struct FileExporter {
  client: ApiClient,
  handler: Arc<dyn FileHandler>,
}

impl FileExporter {
  pub fn new(client: ApiClient, handler: Arc<dyn FileHandler>) -> Self {
    Self { client, handler }
  }

  /// Resolve `query` to exactly one file data object, pick one of its
  /// storage locations, and download it into `destination_dir` under its
  /// registered file name.
  #[instrument(skip_all, fields(query = %query))]
  pub async fn export_file(
    &self,
    query: &str,
    destination_dir: &Path,
  ) -> Result<PathBuf, StorageError> {
    let matched = self
      .client
      .get_file_data_object_index(Some(query), 1, 1)
      .await?;
    // Cardinality bounds make the single element certain.
    let stored = matched.into_iter().next().ok_or_else(|| StorageError::Transfer {
      message: format!("no file matched '{query}'"),
    })?;
    let DataObject::File(file) = &stored.object else {
      return Err(StorageError::Transfer {
        message: format!("'{query}' did not resolve to a file data object"),
      });
    };

    let locations = self.client.get_storage_locations_by_file(&stored.id).await?;
    let location = locations.first().ok_or_else(|| StorageError::Transfer {
      message: format!("file '{}' has no registered storage location", file.file_name),
    })?;

    let local_path = destination_dir.join(&file.file_name);
    self.handler.download(&location.object, &local_path).await?;
    info!(file_id = %stored.id, path = %local_path.display(), "file_exported");
    Ok(local_path)
  }
}
