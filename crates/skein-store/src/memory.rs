use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{Error, Kind, Store};

/// In-memory store for tests and embedded use.
///
/// A single lock over all kinds keeps `transition` atomic with respect to
/// every other operation.
#[derive(Default)]
pub struct MemoryStore {
  records: RwLock<HashMap<Kind, BTreeMap<String, Value>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn put(&self, kind: Kind, id: &str, body: Value) -> Result<(), Error> {
    let mut records = self.records.write().await;
    records.entry(kind).or_default().insert(id.to_string(), body);
    Ok(())
  }

  async fn insert(&self, kind: Kind, id: &str, body: Value) -> Result<bool, Error> {
    let mut records = self.records.write().await;
    let of_kind = records.entry(kind).or_default();
    if of_kind.contains_key(id) {
      return Ok(false);
    }
    of_kind.insert(id.to_string(), body);
    Ok(true)
  }

  async fn get(&self, kind: Kind, id: &str) -> Result<Option<Value>, Error> {
    let records = self.records.read().await;
    Ok(records.get(&kind).and_then(|m| m.get(id)).cloned())
  }

  async fn list(&self, kind: Kind) -> Result<Vec<(String, Value)>, Error> {
    let records = self.records.read().await;
    Ok(
      records
        .get(&kind)
        .map(|m| m.iter().map(|(id, body)| (id.clone(), body.clone())).collect())
        .unwrap_or_default(),
    )
  }

  async fn transition(
    &self,
    kind: Kind,
    id: &str,
    from: &str,
    to: &str,
  ) -> Result<bool, Error> {
    let mut records = self.records.write().await;
    let Some(body) = records.entry(kind).or_default().get_mut(id) else {
      return Ok(false);
    };
    if body.get("status").and_then(Value::as_str) != Some(from) {
      return Ok(false);
    }
    body["status"] = Value::String(to.to_string());
    Ok(true)
  }
}
