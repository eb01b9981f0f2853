//! Skein Store
//!
//! This crate provides the storage boundary for skein's data objects and run
//! records. The persistence engine is deliberately narrow: a transactional
//! key-object store reachable by (kind, id), with one conditional primitive
//! for status transitions.
//!
//! The [`Store`] trait defines that boundary; [`MemoryStore`] backs tests and
//! embedded use, [`SqliteStore`] persists to disk. The [`ObjectStore`]
//! extension layers typed accessors for every model entity on top, including
//! the atomic claim used to guard dispatch.

mod memory;
mod objects;
mod sqlite;

pub use memory::MemoryStore;
pub use objects::{AvailabilitySnapshot, ObjectStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// The object was rejected at creation time.
  #[error(transparent)]
  Invalid(#[from] skein_model::ValidationError),

  /// A record body could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Record kinds the store partitions objects by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  DataObject,
  FileStorageLocation,
  Workflow,
  RunRequest,
  WorkflowRun,
  TaskRun,
  FileImport,
  DataSourceRecord,
}

impl Kind {
  /// Singular storage key for this kind.
  pub fn key(self) -> &'static str {
    match self {
      Self::DataObject => "data_object",
      Self::FileStorageLocation => "file_storage_location",
      Self::Workflow => "workflow",
      Self::RunRequest => "run_request",
      Self::WorkflowRun => "workflow_run",
      Self::TaskRun => "task_run",
      Self::FileImport => "file_import",
      Self::DataSourceRecord => "data_source_record",
    }
  }

  /// Plural name used as the index envelope key.
  pub fn plural(self) -> &'static str {
    match self {
      Self::DataObject => "data_objects",
      Self::FileStorageLocation => "file_storage_locations",
      Self::Workflow => "workflows",
      Self::RunRequest => "run_requests",
      Self::WorkflowRun => "workflow_runs",
      Self::TaskRun => "task_runs",
      Self::FileImport => "file_imports",
      Self::DataSourceRecord => "data_source_records",
    }
  }
}

/// Transactional key-object store.
///
/// All run-state mutation funnels through [`Store::transition`]: a
/// compare-and-set on the record's `status` field. No caller may emulate it
/// with a read-modify-write.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create or replace the record at (kind, id).
  async fn put(&self, kind: Kind, id: &str, body: Value) -> Result<(), Error>;

  /// Create the record only if (kind, id) is absent. Returns whether this
  /// call created it.
  async fn insert(&self, kind: Kind, id: &str, body: Value) -> Result<bool, Error>;

  /// Fetch one record by id.
  async fn get(&self, kind: Kind, id: &str) -> Result<Option<Value>, Error>;

  /// All records of one kind, with their ids, in a stable order.
  async fn list(&self, kind: Kind) -> Result<Vec<(String, Value)>, Error>;

  /// Atomically move the record's `status` from `from` to `to`.
  ///
  /// Returns `true` iff this call performed the transition; `false` when the
  /// record is missing or its status did not match `from`. Two concurrent
  /// callers can never both observe `true` for the same transition.
  async fn transition(&self, kind: Kind, id: &str, from: &str, to: &str)
  -> Result<bool, Error>;
}
