//! Cloud file handler: object storage through an S3-compatible API.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use skein_model::{FileContents, FileHandlerSettings, StorageAddress, StorageLocation};

use crate::StorageError;
use crate::handler::{FileHandler, import_path, path_string, step_output_path};

/// Object-store storage. The client honors an endpoint override and forces
/// path-style addressing so any S3-compatible store works.
pub struct CloudFileHandler {
  client: Client,
  project_id: String,
  bucket_id: String,
  settings: FileHandlerSettings,
}

impl CloudFileHandler {
  pub async fn new(settings: FileHandlerSettings) -> Result<Self, StorageError> {
    let project_id = settings
      .project_id
      .clone()
      .ok_or_else(|| misconfigured("project_id is required for the cloud backend"))?;
    let bucket_id = settings
      .bucket_id
      .clone()
      .ok_or_else(|| misconfigured("bucket_id is required for the cloud backend"))?;

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(endpoint) = &settings.endpoint {
      loader = loader.endpoint_url(endpoint);
    }
    let shared_config = loader.load().await;
    let config = aws_sdk_s3::config::Builder::from(&shared_config)
      .force_path_style(true)
      .build();

    Ok(Self {
      client: Client::from_conf(config),
      project_id,
      bucket_id,
      settings,
    })
  }

  fn blob_path<'a>(&self, location: &'a StorageLocation) -> Result<&'a str, StorageError> {
    match &location.address {
      StorageAddress::Cloud { blob_path, .. } => Ok(blob_path),
      other => Err(StorageError::AddressMismatch {
        backend: "cloud",
        location: other.describe(),
      }),
    }
  }

  fn cloud_address(&self, blob_path: String) -> StorageAddress {
    StorageAddress::Cloud {
      project_id: self.project_id.clone(),
      bucket_id: self.bucket_id.clone(),
      blob_path,
    }
  }
}

fn misconfigured(message: &str) -> StorageError {
  StorageError::Misconfigured {
    message: message.to_string(),
  }
}

fn cloud_error(operation: &str, error: impl std::fmt::Display) -> StorageError {
  StorageError::Cloud {
    message: format!("{operation}: {error}"),
  }
}

#[async_trait]
impl FileHandler for CloudFileHandler {
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
      address: self.cloud_address(path_string(&path)),
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
      address: self.cloud_address(path_string(&path)),
    })
  }

  async fn upload(
    &self,
    local_path: &Path,
    destination: &StorageLocation,
  ) -> Result<(), StorageError> {
    let blob_path = self.blob_path(destination)?;
    let body = ByteStream::from_path(local_path)
      .await
      .map_err(|e| cloud_error("open upload body", e))?;
    debug!(bucket = %self.bucket_id, blob_path, "putting object");
    self
      .client
      .put_object()
      .bucket(&self.bucket_id)
      .key(blob_path)
      .body(body)
      .send()
      .await
      .map_err(|e| cloud_error("put_object", e))?;
    Ok(())
  }

  async fn download(
    &self,
    location: &StorageLocation,
    local_path: &Path,
  ) -> Result<(), StorageError> {
    let blob_path = self.blob_path(location)?;
    debug!(bucket = %self.bucket_id, blob_path, "getting object");
    let response = self
      .client
      .get_object()
      .bucket(&self.bucket_id)
      .key(blob_path)
      .send()
      .await
      .map_err(|e| cloud_error("get_object", e))?;
    let bytes = response
      .body
      .collect()
      .await
      .map_err(|e| cloud_error("read object body", e))?
      .into_bytes();

    if let Some(parent) = local_path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;
    }
    tokio::fs::write(local_path, &bytes)
      .await
      .map_err(|e| StorageError::io(local_path, e))?;
    Ok(())
  }
}
