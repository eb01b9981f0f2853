//! The API client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use skein_model::{
  DataObject, DataSourceRecord, FileHandlerSettings, FileImport, RunRequest, ServiceInfo,
  StorageLocation, Stored, TaskRun, Workflow, WorkflowRun, WorkerSettings,
};

use crate::ClientError;

/// Response envelope for create and update calls. The wire body also carries
/// a human-readable `message`, which callers have no use for.
#[derive(serde::Deserialize)]
struct ObjectEnvelope {
  #[serde(rename = "_id")]
  id: String,
  object: Value,
}

/// Client for the coordinating service's HTTP+JSON API.
#[derive(Clone)]
pub struct ApiClient {
  base_url: String,
  http: reqwest::Client,
}

impl ApiClient {
  /// Build a client for the service at `base_url`, e.g.
  /// `http://localhost:8000`.
  pub fn new(base_url: impl Into<String>) -> Self {
    let mut base_url = base_url.into();
    while base_url.ends_with('/') {
      base_url.pop();
    }
    Self {
      base_url,
      http: reqwest::Client::new(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api/{}", self.base_url, path)
  }

  fn connectivity(&self, url: &str, err: reqwest::Error) -> ClientError {
    ClientError::Connectivity {
      url: url.to_string(),
      message: err.to_string(),
    }
  }

  async fn read_body(&self, url: &str, response: reqwest::Response) -> Result<(u16, String), ClientError> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| self.connectivity(url, e))?;
    Ok((status, body))
  }

  /// POST an object and return (assigned id, object as stored).
  async fn post_object<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<(String, T), ClientError> {
    let url = self.url(path);
    let response = self
      .http
      .post(&url)
      .json(body)
      .send()
      .await
      .map_err(|e| self.connectivity(&url, e))?;
    let (status, body) = self.read_body(&url, response).await?;
    if !(200..300).contains(&status) {
      return Err(ClientError::Response { status, body });
    }
    let envelope: ObjectEnvelope = serde_json::from_str(&body)?;
    Ok((envelope.id, serde_json::from_value(envelope.object)?))
  }

  /// GET one object; a 404 is `None`, every other non-2xx is an error.
  async fn get_object<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ClientError> {
    let url = self.url(path);
    let response = self
      .http
      .get(&url)
      .send()
      .await
      .map_err(|e| self.connectivity(&url, e))?;
    let (status, body) = self.read_body(&url, response).await?;
    match status {
      200 => Ok(Some(serde_json::from_str(&body)?)),
      404 => Ok(None),
      _ => Err(ClientError::Response { status, body }),
    }
  }

  /// GET an index and pull the named array out of its envelope.
  async fn get_index<T: DeserializeOwned>(
    &self,
    path: &str,
    envelope_key: &str,
    query: Option<&str>,
  ) -> Result<Vec<T>, ClientError> {
    let url = self.url(path);
    let mut request = self.http.get(&url);
    if let Some(q) = query {
      request = request.query(&[("q", q)]);
    }
    let response = request.send().await.map_err(|e| self.connectivity(&url, e))?;
    let (status, body) = self.read_body(&url, response).await?;
    if status != 200 {
      return Err(ClientError::Response { status, body });
    }
    let value: Value = serde_json::from_str(&body)?;
    let items = value.get(envelope_key).cloned().unwrap_or(Value::Array(vec![]));
    Ok(serde_json::from_value(items)?)
  }

  fn check_bounds<T>(
    kind: &'static str,
    query: Option<&str>,
    items: Vec<T>,
    min: usize,
    max: usize,
  ) -> Result<Vec<T>, ClientError> {
    let query = query.unwrap_or("").to_string();
    if items.len() < min {
      return Err(ClientError::TooFewMatches {
        kind,
        query,
        found: items.len(),
        min,
      });
    }
    if items.len() > max {
      return Err(ClientError::TooManyMatches {
        kind,
        query,
        found: items.len(),
        max,
      });
    }
    Ok(items)
  }

  // ---- data objects ----

  pub async fn post_data_object(
    &self,
    object: &DataObject,
  ) -> Result<(String, DataObject), ClientError> {
    self.post_object("data-objects/", object).await
  }

  pub async fn get_data_object(&self, id: &str) -> Result<Option<DataObject>, ClientError> {
    self.get_object(&format!("data-objects/{id}/")).await
  }

  pub async fn get_data_object_index(
    &self,
    query: Option<&str>,
  ) -> Result<Vec<Stored<DataObject>>, ClientError> {
    self.get_index("data-objects/", "data_objects", query).await
  }

  /// Index of file data objects only, with cardinality bounds.
  pub async fn get_file_data_object_index(
    &self,
    query: Option<&str>,
    min: usize,
    max: usize,
  ) -> Result<Vec<Stored<DataObject>>, ClientError> {
    let items = self
      .get_index("file-data-objects/", "file_data_objects", query)
      .await?;
    Self::check_bounds("file data objects", query, items, min, max)
  }

  // ---- storage locations and provenance ----

  pub async fn post_file_storage_location(
    &self,
    location: &StorageLocation,
  ) -> Result<(String, StorageLocation), ClientError> {
    self.post_object("file-storage-locations/", location).await
  }

  pub async fn get_storage_locations_by_file(
    &self,
    file_id: &str,
  ) -> Result<Vec<Stored<StorageLocation>>, ClientError> {
    self
      .get_index(
        &format!("file-data-objects/{file_id}/file-storage-locations/"),
        "file_storage_locations",
        None,
      )
      .await
  }

  pub async fn post_file_import(
    &self,
    import: &FileImport,
  ) -> Result<(String, FileImport), ClientError> {
    self.post_object("file-imports/", import).await
  }

  pub async fn update_file_import(
    &self,
    id: &str,
    import: &FileImport,
  ) -> Result<(String, FileImport), ClientError> {
    self.post_object(&format!("file-imports/{id}/"), import).await
  }

  pub async fn get_file_imports_by_file(
    &self,
    file_id: &str,
  ) -> Result<Vec<Stored<FileImport>>, ClientError> {
    self
      .get_index(
        &format!("file-data-objects/{file_id}/file-imports/"),
        "file_imports",
        None,
      )
      .await
  }

  pub async fn post_data_source_record(
    &self,
    record: &DataSourceRecord,
  ) -> Result<(String, DataSourceRecord), ClientError> {
    self.post_object("data-source-records/", record).await
  }

  // ---- workflows and runs ----

  pub async fn post_workflow(
    &self,
    workflow: &Workflow,
  ) -> Result<(String, Workflow), ClientError> {
    self.post_object("workflows/", workflow).await
  }

  pub async fn get_workflow_index(
    &self,
    query: Option<&str>,
    min: usize,
    max: usize,
  ) -> Result<Vec<Stored<Workflow>>, ClientError> {
    let items = self.get_index("workflows/", "workflows", query).await?;
    Self::check_bounds("workflows", query, items, min, max)
  }

  pub async fn post_run_request(
    &self,
    request: &RunRequest,
  ) -> Result<(String, RunRequest), ClientError> {
    self.post_object("run-requests/", request).await
  }

  pub async fn get_workflow_run(&self, id: &str) -> Result<Option<WorkflowRun>, ClientError> {
    self.get_object(&format!("workflow-runs/{id}/")).await
  }

  pub async fn get_workflow_run_index(
    &self,
    query: Option<&str>,
    min: usize,
    max: usize,
  ) -> Result<Vec<Stored<WorkflowRun>>, ClientError> {
    let items = self.get_index("workflow-runs/", "workflow_runs", query).await?;
    Self::check_bounds("workflow runs", query, items, min, max)
  }

  pub async fn get_task_run(&self, id: &str) -> Result<Option<TaskRun>, ClientError> {
    self.get_object(&format!("task-runs/{id}/")).await
  }

  // ---- informational ----

  /// Server clock; use this instead of local time when stamping client-side
  /// records.
  pub async fn get_server_time(&self) -> Result<DateTime<Utc>, ClientError> {
    #[derive(serde::Deserialize)]
    struct TimeEnvelope {
      time: DateTime<Utc>,
    }
    let envelope: Option<TimeEnvelope> = self.get_object("server-time/").await?;
    match envelope {
      Some(e) => Ok(e.time),
      None => Err(ClientError::Response {
        status: 404,
        body: "server-time endpoint missing".to_string(),
      }),
    }
  }

  pub async fn get_filehandler_settings(&self) -> Result<FileHandlerSettings, ClientError> {
    #[derive(serde::Deserialize)]
    struct Envelope {
      file_handler_info: FileHandlerSettings,
    }
    let envelope: Option<Envelope> = self.get_object("filehandler-info/").await?;
    match envelope {
      Some(e) => Ok(e.file_handler_info),
      None => Err(ClientError::Response {
        status: 404,
        body: "filehandler-info endpoint missing".to_string(),
      }),
    }
  }

  pub async fn get_worker_settings(&self) -> Result<WorkerSettings, ClientError> {
    #[derive(serde::Deserialize)]
    struct Envelope {
      worker_info: WorkerSettings,
    }
    let envelope: Option<Envelope> = self.get_object("worker-info/").await?;
    match envelope {
      Some(e) => Ok(e.worker_info),
      None => Err(ClientError::Response {
        status: 404,
        body: "worker-info endpoint missing".to_string(),
      }),
    }
  }

  pub async fn get_info(&self) -> Result<ServiceInfo, ClientError> {
    let info: Option<ServiceInfo> = self.get_object("info/").await?;
    info.ok_or(ClientError::Response {
      status: 404,
      body: "info endpoint missing".to_string(),
    })
  }

  /// Service version, or `None` when the service is unreachable.
  pub async fn get_version(&self) -> Option<String> {
    self.get_info().await.ok().map(|i| i.version)
  }

  // ---- reconciliation triggers ----

  /// Ask the service to dispatch newly runnable tasks. Safe to call
  /// repeatedly.
  pub async fn run_tasks(&self) -> Result<(), ClientError> {
    let _: Option<Value> = self.get_object("run-tasks/").await?;
    Ok(())
  }

  /// Ask the service to advance run statuses. Safe to call repeatedly.
  pub async fn update_tasks(&self) -> Result<(), ClientError> {
    let _: Option<Value> = self.get_object("update-tasks/").await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base_url_is_normalized() {
    let client = ApiClient::new("http://localhost:8000///");
    assert_eq!(client.url("workflows/"), "http://localhost:8000/api/workflows/");
  }

  #[test]
  fn create_envelope_parses() {
    let body = r#"{"message": "created data_object", "_id": "abc", "object": {"type": "string", "string_value": "x", "_id": "abc"}}"#;
    let envelope: ObjectEnvelope = serde_json::from_str(body).unwrap();
    assert_eq!(envelope.id, "abc");
    let object: DataObject = serde_json::from_value(envelope.object).unwrap();
    assert!(matches!(object, DataObject::String(_)));
  }
}
