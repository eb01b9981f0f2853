//! Typed accessors layered over the raw key-object store.
//!
//! Everything here is a default method over [`Store`], so any backend gets
//! the full object API. Immutable entities (data objects, workflows) are
//! created with `insert` keyed on their content id: re-registering identical
//! content reuses the existing record instead of duplicating it.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use skein_model::{
  AvailabilityIndex, DataObject, DataSourceRecord, FileContents, FileImport, RunRequest,
  RunStatus, StorageLocation, Stored, TaskRun, Workflow, WorkflowRun, object_id,
};

use crate::{Error, Kind, Store};

/// A point-in-time index of which file contents have at least one registered
/// storage location. Built fresh per availability query so newly added
/// locations are always observed.
#[derive(Debug, Default)]
pub struct AvailabilitySnapshot {
  present: HashSet<FileContents>,
}

impl AvailabilitySnapshot {
  pub fn contains(&self, contents: &FileContents) -> bool {
    self.present.contains(contents)
  }
}

impl AvailabilityIndex for AvailabilitySnapshot {
  fn has_location(&self, contents: &FileContents) -> bool {
    self.present.contains(contents)
  }
}

fn typed<T: serde::de::DeserializeOwned>(id: String, body: Value) -> Result<Stored<T>, Error> {
  Ok(Stored {
    id,
    object: serde_json::from_value(body)?,
  })
}

/// Free-text match on id, display name, or owning request id, as index
/// queries use.
fn matches_query(id: &str, body: &Value, query: &str) -> bool {
  if id == query || id.starts_with(query) {
    return true;
  }
  let name = body
    .get("name")
    .or_else(|| body.get("file_name"))
    .or_else(|| body.get("workflow").and_then(|w| w.get("name")))
    .and_then(Value::as_str);
  if name == Some(query) {
    return true;
  }
  body.get("run_request_id").and_then(Value::as_str) == Some(query)
}

/// Typed object operations over the store boundary.
#[async_trait]
pub trait ObjectStore: Store {
  // ---- data objects ----

  /// Register a data object, validating it first. Content-addressed: the
  /// returned id is derived from the object itself, and registering the
  /// same content twice reuses the existing record.
  async fn register_data_object(&self, object: &DataObject) -> Result<String, Error> {
    object.validate()?;
    let id = object_id(object)?;
    self
      .insert(Kind::DataObject, &id, serde_json::to_value(object)?)
      .await?;
    Ok(id)
  }

  async fn data_object(&self, id: &str) -> Result<Option<DataObject>, Error> {
    match self.get(Kind::DataObject, id).await? {
      Some(body) => Ok(Some(serde_json::from_value(body)?)),
      None => Ok(None),
    }
  }

  async fn data_objects(
    &self,
    query: Option<&str>,
  ) -> Result<Vec<Stored<DataObject>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::DataObject).await? {
      if query.is_none_or(|q| matches_query(&id, &body, q)) {
        records.push(typed(id, body)?);
      }
    }
    Ok(records)
  }

  // ---- storage locations ----

  /// Register a storage location. Location ids derive from the record
  /// itself, so re-registering the same placement is a no-op while distinct
  /// placements of identical content (timestamped import paths) always get
  /// their own record.
  async fn add_location(&self, location: &StorageLocation) -> Result<String, Error> {
    let id = object_id(location)?;
    self
      .insert(Kind::FileStorageLocation, &id, serde_json::to_value(location)?)
      .await?;
    Ok(id)
  }

  async fn locations(&self) -> Result<Vec<Stored<StorageLocation>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::FileStorageLocation).await? {
      records.push(typed(id, body)?);
    }
    Ok(records)
  }

  async fn locations_for(
    &self,
    contents: &FileContents,
  ) -> Result<Vec<Stored<StorageLocation>>, Error> {
    Ok(
      self
        .locations()
        .await?
        .into_iter()
        .filter(|l| &l.object.file_contents == contents)
        .collect(),
    )
  }

  /// Build a fresh availability index from the current location records.
  async fn availability(&self) -> Result<AvailabilitySnapshot, Error> {
    let mut present = HashSet::new();
    for location in self.locations().await? {
      present.insert(location.object.file_contents);
    }
    Ok(AvailabilitySnapshot { present })
  }

  // ---- workflows ----

  async fn register_workflow(&self, workflow: &Workflow) -> Result<String, Error> {
    workflow.validate()?;
    let id = workflow.id()?;
    self
      .insert(Kind::Workflow, &id, serde_json::to_value(workflow)?)
      .await?;
    Ok(id)
  }

  async fn workflow(&self, id: &str) -> Result<Option<Workflow>, Error> {
    match self.get(Kind::Workflow, id).await? {
      Some(body) => Ok(Some(serde_json::from_value(body)?)),
      None => Ok(None),
    }
  }

  async fn workflows(&self, query: Option<&str>) -> Result<Vec<Stored<Workflow>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::Workflow).await? {
      if query.is_none_or(|q| matches_query(&id, &body, q)) {
        records.push(typed(id, body)?);
      }
    }
    Ok(records)
  }

  // ---- run requests and workflow runs ----

  async fn add_run_request(&self, request: &RunRequest) -> Result<String, Error> {
    let id = uuid::Uuid::new_v4().to_string();
    self
      .put(Kind::RunRequest, &id, serde_json::to_value(request)?)
      .await?;
    Ok(id)
  }

  async fn run_requests(&self) -> Result<Vec<Stored<RunRequest>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::RunRequest).await? {
      records.push(typed(id, body)?);
    }
    Ok(records)
  }

  async fn add_workflow_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    self
      .put(Kind::WorkflowRun, &run.id, serde_json::to_value(run)?)
      .await
  }

  async fn workflow_run(&self, id: &str) -> Result<Option<WorkflowRun>, Error> {
    match self.get(Kind::WorkflowRun, id).await? {
      Some(body) => Ok(Some(serde_json::from_value(body)?)),
      None => Ok(None),
    }
  }

  async fn workflow_runs(
    &self,
    query: Option<&str>,
  ) -> Result<Vec<Stored<WorkflowRun>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::WorkflowRun).await? {
      if query.is_none_or(|q| matches_query(&id, &body, q)) {
        records.push(typed(id, body)?);
      }
    }
    Ok(records)
  }

  /// Persist derived fields of a workflow run (step run snapshot,
  /// timestamps). Status changes still go through [`Self::mark_workflow_run`].
  async fn save_workflow_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    self.add_workflow_run(run).await
  }

  async fn mark_workflow_run(
    &self,
    id: &str,
    from: RunStatus,
    to: RunStatus,
  ) -> Result<bool, Error> {
    self
      .transition(Kind::WorkflowRun, id, from.as_str(), to.as_str())
      .await
  }

  /// Move a workflow run to failed from whichever non-terminal status it
  /// currently has.
  async fn fail_workflow_run(&self, id: &str) -> Result<bool, Error> {
    if self.mark_workflow_run(id, RunStatus::Running, RunStatus::Failed).await? {
      return Ok(true);
    }
    self.mark_workflow_run(id, RunStatus::Pending, RunStatus::Failed).await
  }

  // ---- task runs ----

  /// Create a task run if no run with its id exists yet. Task run ids are
  /// deterministic per (workflow run, step), so concurrent reconciliation
  /// passes collapse onto a single record.
  async fn add_task_run(&self, run: &TaskRun) -> Result<bool, Error> {
    self
      .insert(Kind::TaskRun, &run.id, serde_json::to_value(run)?)
      .await
  }

  async fn task_run(&self, id: &str) -> Result<Option<TaskRun>, Error> {
    match self.get(Kind::TaskRun, id).await? {
      Some(body) => Ok(Some(serde_json::from_value(body)?)),
      None => Ok(None),
    }
  }

  async fn task_runs(&self) -> Result<Vec<Stored<TaskRun>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::TaskRun).await? {
      records.push(typed(id, body)?);
    }
    Ok(records)
  }

  /// Persist non-status fields of a task run. Only the caller that won the
  /// relevant status transition may save, so last-write races cannot occur.
  async fn save_task_run(&self, run: &TaskRun) -> Result<(), Error> {
    self
      .put(Kind::TaskRun, &run.id, serde_json::to_value(run)?)
      .await
  }

  /// The dispatch guard: atomically move `pending -> running`. Exactly one
  /// of any number of concurrent claims returns `true`.
  async fn claim_task_run(&self, id: &str) -> Result<bool, Error> {
    self
      .transition(
        Kind::TaskRun,
        id,
        RunStatus::Pending.as_str(),
        RunStatus::Running.as_str(),
      )
      .await
  }

  async fn mark_task_run(
    &self,
    id: &str,
    from: RunStatus,
    to: RunStatus,
  ) -> Result<bool, Error> {
    self.transition(Kind::TaskRun, id, from.as_str(), to.as_str()).await
  }

  // ---- provenance ----

  async fn add_file_import(&self, import: &FileImport) -> Result<String, Error> {
    let id = uuid::Uuid::new_v4().to_string();
    self
      .put(Kind::FileImport, &id, serde_json::to_value(import)?)
      .await?;
    Ok(id)
  }

  async fn file_import(&self, id: &str) -> Result<Option<FileImport>, Error> {
    match self.get(Kind::FileImport, id).await? {
      Some(body) => Ok(Some(serde_json::from_value(body)?)),
      None => Ok(None),
    }
  }

  async fn file_imports(&self) -> Result<Vec<Stored<FileImport>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::FileImport).await? {
      records.push(typed(id, body)?);
    }
    Ok(records)
  }

  async fn file_imports_for(&self, file_id: &str) -> Result<Vec<Stored<FileImport>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::FileImport).await? {
      if body.get("file_data_object_id").and_then(Value::as_str) == Some(file_id) {
        records.push(typed(id, body)?);
      }
    }
    Ok(records)
  }

  async fn add_data_source_record(&self, record: &DataSourceRecord) -> Result<String, Error> {
    let id = uuid::Uuid::new_v4().to_string();
    self
      .put(Kind::DataSourceRecord, &id, serde_json::to_value(record)?)
      .await?;
    Ok(id)
  }

  async fn data_source_records(&self) -> Result<Vec<Stored<DataSourceRecord>>, Error> {
    let mut records = Vec::new();
    for (id, body) in self.list(Kind::DataSourceRecord).await? {
      records.push(typed(id, body)?);
    }
    Ok(records)
  }
}

#[async_trait]
impl<S: Store + ?Sized> ObjectStore for S {}

#[cfg(test)]
mod tests {
  use skein_model::{
    DataObjectArray, FileDataObject, HashFunction, StorageAddress, StringDataObject,
  };

  use super::*;
  use crate::MemoryStore;

  fn file_object(name: &str, hash: &str) -> DataObject {
    DataObject::File(FileDataObject {
      file_name: name.to_string(),
      file_contents: FileContents {
        hash_function: HashFunction::Md5,
        hash_value: hash.to_string(),
      },
      metadata: Default::default(),
    })
  }

  fn local_location(hash: &str, path: &str) -> StorageLocation {
    StorageLocation {
      file_contents: FileContents {
        hash_function: HashFunction::Md5,
        hash_value: hash.to_string(),
      },
      address: StorageAddress::LocalPath {
        file_path: path.to_string(),
      },
    }
  }

  #[tokio::test]
  async fn identical_content_registers_once() {
    let store = MemoryStore::new();
    let first = store.register_data_object(&file_object("a.txt", "aa")).await.unwrap();
    let second = store.register_data_object(&file_object("a.txt", "aa")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.data_objects(None).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn heterogeneous_array_persists_nothing() {
    let store = MemoryStore::new();
    let mixed = DataObject::Array(DataObjectArray {
      data_objects: vec![
        file_object("a.txt", "aa"),
        DataObject::String(StringDataObject {
          string_value: "x".to_string(),
        }),
      ],
    });
    assert!(matches!(
      store.register_data_object(&mixed).await,
      Err(Error::Invalid(_))
    ));
    assert!(store.data_objects(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn availability_follows_location_count() {
    let store = MemoryStore::new();
    let object = file_object("a.txt", "aa");
    store.register_data_object(&object).await.unwrap();

    let before = store.availability().await.unwrap();
    assert!(!object.is_available(&before));

    store.add_location(&local_location("aa", "/data/a")).await.unwrap();
    // The snapshot is rebuilt per query, so the new location is observed.
    let after = store.availability().await.unwrap();
    assert!(object.is_available(&after));

    let contents = FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "aa".to_string(),
    };
    assert_eq!(store.locations_for(&contents).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn a_contents_may_have_many_locations() {
    let store = MemoryStore::new();
    store.add_location(&local_location("aa", "/data/one")).await.unwrap();
    store.add_location(&local_location("aa", "/data/two")).await.unwrap();
    let contents = FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "aa".to_string(),
    };
    assert_eq!(store.locations_for(&contents).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn workflow_index_matches_name_or_id_prefix() {
    let store = MemoryStore::new();
    let workflow = Workflow {
      name: "hello".to_string(),
      steps: vec![skein_model::Step {
        name: "s1".to_string(),
        command: "true".to_string(),
        environment: Default::default(),
        resources: Default::default(),
        input_ports: vec![],
        output_ports: vec![],
      }],
      inputs: vec![],
      data_pipes: vec![],
    };
    let id = store.register_workflow(&workflow).await.unwrap();

    assert_eq!(store.workflows(Some("hello")).await.unwrap().len(), 1);
    assert_eq!(store.workflows(Some(&id[..8])).await.unwrap().len(), 1);
    assert!(store.workflows(Some("nope")).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn claim_task_run_admits_one_winner() {
    let store = MemoryStore::new();
    let step = skein_model::Step {
      name: "s1".to_string(),
      command: "true".to_string(),
      environment: Default::default(),
      resources: Default::default(),
      input_ports: vec![],
      output_ports: vec![],
    };
    let run = TaskRun::new("wfr-1", &step, vec![]);
    assert!(store.add_task_run(&run).await.unwrap());
    // Re-adding the deterministic id does not create a second record.
    assert!(!store.add_task_run(&TaskRun::new("wfr-1", &step, vec![])).await.unwrap());

    assert!(store.claim_task_run(&run.id).await.unwrap());
    assert!(!store.claim_task_run(&run.id).await.unwrap());

    let stored = store.task_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Running);
  }
}
