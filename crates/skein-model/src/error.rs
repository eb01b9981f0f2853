use thiserror::Error;

use crate::data_object::DataObjectKind;

/// Errors raised when an object is rejected at creation time.
///
/// A validation failure never persists a partial object.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
  /// An array mixed more than one concrete data object kind.
  #[error("array elements must share one concrete kind: expected {expected}, found {found}")]
  HeterogeneousArray {
    expected: DataObjectKind,
    found: DataObjectKind,
  },

  /// The workflow definition is structurally invalid.
  #[error("malformed workflow: {message}")]
  MalformedWorkflow { message: String },

  /// A run request named a channel the workflow does not declare.
  #[error("channel '{channel}' is not declared by workflow '{workflow}'")]
  UnknownChannel { channel: String, workflow: String },

  /// A run request left a declared input channel unbound.
  #[error("no input supplied for channel '{channel}'")]
  MissingChannel { channel: String },
}
