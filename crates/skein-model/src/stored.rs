//! Wrapper pairing an object with its store-assigned id on the wire.

use serde::{Deserialize, Serialize};

/// An object together with the id it is reachable by.
///
/// API responses embed the id as `_id` beside the object's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(flatten)]
  pub object: T,
}
