//! Skein Storage
//!
//! Content-addressable file storage for skein. A [`FileHandler`] moves bytes
//! between the local filesystem and one storage backend and computes the
//! deterministic destination paths imports and step outputs land at; the
//! backend is chosen once at startup from server-reported settings.
//!
//! [`FileImporter`] implements the two-phase import protocol on top: the
//! content identity is registered with the coordinating service first, then
//! the bytes are placed at a destination derived from the assigned id, and
//! finally the storage location and provenance are recorded.
//!
//! This layer performs no retries; any transport failure surfaces to the
//! caller as a typed error.

mod cloud;
mod error;
mod handler;
mod hash;
mod import;
mod local;
mod remote;

pub use cloud::CloudFileHandler;
pub use error::StorageError;
pub use handler::FileHandler;
pub use hash::hash_file;
pub use import::{FileExporter, FileImporter, ImportedFile};
pub use local::LocalFileHandler;
pub use remote::RemoteFileHandler;

use std::sync::Arc;

use skein_model::{FileBackend, FileHandlerSettings};

/// Build the file handler the settings call for.
///
/// The cloud backend constructs its object-store client here, so the factory
/// is async. Misconfiguration (for example a cloud backend without a bucket)
/// is fatal at startup, not recoverable per call.
pub async fn file_handler_for(
  settings: &FileHandlerSettings,
) -> Result<Arc<dyn FileHandler>, StorageError> {
  match settings.backend {
    FileBackend::Local => Ok(Arc::new(LocalFileHandler::new(settings.clone()))),
    FileBackend::Remote => Ok(Arc::new(RemoteFileHandler::new(settings.clone()))),
    FileBackend::Cloud => Ok(Arc::new(CloudFileHandler::new(settings.clone()).await?)),
  }
}

/// Parse a backend name from configuration text.
///
/// Names outside the registered strategy set are an
/// [`StorageError::UnsupportedBackend`], fatal at startup.
pub fn parse_file_backend(name: &str) -> Result<FileBackend, StorageError> {
  match name.to_ascii_lowercase().as_str() {
    "local" => Ok(FileBackend::Local),
    "remote" => Ok(FileBackend::Remote),
    "cloud" => Ok(FileBackend::Cloud),
    _ => Err(StorageError::UnsupportedBackend {
      name: name.to_string(),
    }),
  }
}
