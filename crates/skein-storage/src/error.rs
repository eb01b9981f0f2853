use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
  /// Configuration named a storage backend with no registered strategy.
  #[error("unsupported storage backend '{name}'")]
  UnsupportedBackend { name: String },

  /// The backend settings are incomplete for the selected strategy.
  #[error("misconfigured storage backend: {message}")]
  Misconfigured { message: String },

  /// A filesystem operation failed.
  #[error("io error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  /// A local path did not have the shape a destination is derived from.
  #[error("cannot derive a destination from '{path}': {message}")]
  InvalidPath { path: String, message: String },

  /// A location of one backend kind was handed to a handler of another.
  #[error("the {backend} backend cannot handle location {location}")]
  AddressMismatch { backend: &'static str, location: String },

  /// A transfer subprocess or stream failed.
  #[error("transfer failed: {message}")]
  Transfer { message: String },

  /// The cloud object store reported an error.
  #[error("cloud storage error: {message}")]
  Cloud { message: String },

  /// A coordinating-service call failed during import or export.
  #[error(transparent)]
  Api(#[from] skein_client::ClientError),
}

impl StorageError {
  pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
    Self::Io {
      path: path.display().to_string(),
      source,
    }
  }
}
