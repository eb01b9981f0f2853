//! Remote file handler: transfers over ssh/scp to a file server host.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use skein_model::{FileContents, FileHandlerSettings, StorageAddress, StorageLocation};

use crate::StorageError;
use crate::handler::{FileHandler, import_path, path_string, step_output_path};

/// Storage on a remote POSIX host reachable over a secure channel.
pub struct RemoteFileHandler {
  settings: FileHandlerSettings,
}

impl RemoteFileHandler {
  pub fn new(settings: FileHandlerSettings) -> Self {
    Self { settings }
  }

  fn server_address<'a>(
    &self,
    location: &'a StorageLocation,
  ) -> Result<(&'a str, &'a str), StorageError> {
    match &location.address {
      StorageAddress::Server { host_url, file_path } => Ok((host_url, file_path)),
      other => Err(StorageError::AddressMismatch {
        backend: "remote",
        location: other.describe(),
      }),
    }
  }
}

fn check(command: &str, output: Output) -> Result<(), StorageError> {
  if output.status.success() {
    return Ok(());
  }
  let stderr = String::from_utf8_lossy(&output.stderr);
  Err(StorageError::Transfer {
    message: format!("{command} exited with {}: {}", output.status, stderr.trim()),
  })
}

async fn run(command: &mut Command, name: &str) -> Result<(), StorageError> {
  let output = command.output().await.map_err(|e| StorageError::Transfer {
    message: format!("failed to spawn {name}: {e}"),
  })?;
  check(name, output)
}

#[async_trait]
impl FileHandler for RemoteFileHandler {
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
      address: StorageAddress::Server {
        host_url: self.settings.host_url.clone(),
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
      address: StorageAddress::Server {
        host_url: self.settings.host_url.clone(),
        file_path: path_string(&path),
      },
    })
  }

  async fn upload(
    &self,
    local_path: &Path,
    destination: &StorageLocation,
  ) -> Result<(), StorageError> {
    let (host, file_path) = self.server_address(destination)?;
    let parent = Path::new(file_path)
      .parent()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| "/".to_string());

    debug!(host, file_path, "uploading over scp");
    run(
      Command::new("ssh").arg(host).arg("mkdir").arg("-p").arg(&parent),
      "ssh mkdir",
    )
    .await?;
    run(
      Command::new("scp")
        .arg(local_path)
        .arg(format!("{host}:{file_path}")),
      "scp",
    )
    .await
  }

  async fn download(
    &self,
    location: &StorageLocation,
    local_path: &Path,
  ) -> Result<(), StorageError> {
    let (host, file_path) = self.server_address(location)?;
    if let Some(parent) = local_path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;
    }
    debug!(host, file_path, "downloading over scp");
    run(
      Command::new("scp")
        .arg(format!("{host}:{file_path}"))
        .arg(local_path),
      "scp",
    )
    .await
  }
}

#[cfg(test)]
mod tests {
  use skein_model::{FileBackend, HashFunction};

  use super::*;

  fn settings() -> FileHandlerSettings {
    FileHandlerSettings {
      hash_function: HashFunction::Md5,
      backend: FileBackend::Remote,
      file_root: "/srv/files".to_string(),
      import_dir: "imported_files".to_string(),
      host_url: "files.example.com".to_string(),
      project_id: None,
      bucket_id: None,
      endpoint: None,
    }
  }

  fn contents() -> FileContents {
    FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "aa".to_string(),
    }
  }

  #[test]
  fn destinations_carry_the_file_server_host() {
    let handler = RemoteFileHandler::new(settings());
    let destination = handler
      .import_destination(Path::new("/home/u/data.bin"), &contents(), "deadbeef00ff")
      .unwrap();
    let StorageAddress::Server { host_url, file_path } = &destination.address else {
      panic!("remote handler must produce server destinations");
    };
    assert_eq!(host_url, "files.example.com");
    assert!(file_path.starts_with("/srv/files/imported_files/"));
    assert!(file_path.ends_with("_deadbeef00_data.bin"));
  }

  #[test]
  fn step_output_mirrors_hierarchy_on_the_server() {
    let handler = RemoteFileHandler::new(settings());
    let destination = handler
      .step_output_destination(Path::new("/work/runs/wfr/sr/out.txt"), &contents())
      .unwrap();
    let StorageAddress::Server { file_path, .. } = &destination.address else {
      panic!("remote handler must produce server destinations");
    };
    assert_eq!(file_path, "/srv/files/runs/wfr/sr/out.txt");
  }
}
