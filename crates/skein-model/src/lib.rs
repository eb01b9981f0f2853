//! Skein Model
//!
//! This crate contains the shared data model for skein: content-addressable
//! data objects, storage locations, workflow definitions, and the run records
//! the reconciler advances.
//!
//! Everything here is plain data. Entities that are immutable once created
//! (data objects, file contents, workflow definitions) are identified by a
//! content-derived id; mutable run records carry uuid ids assigned at
//! creation. Persistence and transport live in other crates.

mod data_object;
mod error;
mod id;
mod import;
mod location;
mod run;
mod settings;
mod stored;
mod workflow;

pub use data_object::{
  AvailabilityIndex, BooleanDataObject, DataObject, DataObjectArray, DataObjectKind,
  FileContents, FileDataObject, HashFunction, IntegerDataObject, JsonDataObject,
  StringDataObject,
};
pub use error::ValidationError;
pub use id::{canonical_json, content_id, object_id};
pub use import::{DataSourceRecord, FileImport};
pub use location::{StorageAddress, StorageLocation};
pub use run::{
  Binding, RunRequest, RunRequestInput, RunStatus, StepRun, TaskRun, WorkflowRun,
};
pub use settings::{FileBackend, FileHandlerSettings, ServiceInfo, WorkerBackend, WorkerSettings};
pub use stored::Stored;
pub use workflow::{DataPipe, Environment, Port, PortRef, ResourceRequest, Step, Workflow, WorkflowInput};
