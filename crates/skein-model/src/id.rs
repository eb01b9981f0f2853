//! Content-derived object identity.
//!
//! Immutable entities are identified by the hex sha-256 digest of their
//! canonical JSON rendering, so two structurally identical objects always
//! resolve to the same id regardless of field order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value with object keys sorted, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let fields: Vec<String> = keys
        .into_iter()
        .map(|k| {
          // Keys are plain strings; serializing one cannot fail.
          let key = serde_json::to_string(k).unwrap_or_default();
          format!("{}:{}", key, canonical_json(&map[k]))
        })
        .collect();
      format!("{{{}}}", fields.join(","))
    }
    Value::Array(items) => {
      let items: Vec<String> = items.iter().map(canonical_json).collect();
      format!("[{}]", items.join(","))
    }
    other => other.to_string(),
  }
}

/// Hex sha-256 digest of the canonical rendering of `value`.
pub fn content_id(value: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(canonical_json(value).as_bytes());
  format!("{:x}", hasher.finalize())
}

/// Content id of any serializable object.
pub fn object_id<T: Serialize>(object: &T) -> Result<String, serde_json::Error> {
  Ok(content_id(&serde_json::to_value(object)?))
}
