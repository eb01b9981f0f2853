//! Content-addressable data objects.
//!
//! A [`DataObject`] is any unit of data a workflow step consumes or produces:
//! a file (identified by its content hash), a homogeneous array, or an inline
//! scalar. The variant set is closed; persistence stores the serialized form
//! with its `type` tag.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Hash functions supported for file content identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
  Md5,
  Sha256,
}

impl fmt::Display for HashFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Md5 => write!(f, "md5"),
      Self::Sha256 => write!(f, "sha256"),
    }
  }
}

/// The content identity of a file, independent of its name.
///
/// Two contents are the same iff both the hash function and the hash value
/// match. Shared by any number of file data objects and storage locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileContents {
  pub hash_function: HashFunction,
  pub hash_value: String,
}

/// A named file with content identity and caller-supplied metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDataObject {
  pub file_name: String,
  pub file_contents: FileContents,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, serde_json::Value>,
}

/// An ordered collection of data objects, all of one concrete kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObjectArray {
  pub data_objects: Vec<DataObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringDataObject {
  pub string_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegerDataObject {
  pub integer_value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanDataObject {
  pub boolean_value: bool,
}

/// Any valid JSON value stored inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDataObject {
  pub json_data: serde_json::Value,
}

/// The concrete kind of a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataObjectKind {
  File,
  Array,
  String,
  Integer,
  Boolean,
  Json,
}

impl fmt::Display for DataObjectKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::File => "file",
      Self::Array => "array",
      Self::String => "string",
      Self::Integer => "integer",
      Self::Boolean => "boolean",
      Self::Json => "json",
    };
    write!(f, "{name}")
  }
}

/// Answers whether at least one storage location is registered for a given
/// file contents. Implemented by the store against its location records;
/// callers build a fresh index per query so availability is never stale.
pub trait AvailabilityIndex {
  fn has_location(&self, contents: &FileContents) -> bool;
}

/// A unit of data passed into or produced by workflow steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataObject {
  File(FileDataObject),
  Array(DataObjectArray),
  String(StringDataObject),
  Integer(IntegerDataObject),
  Boolean(BooleanDataObject),
  Json(JsonDataObject),
}

impl DataObject {
  pub fn kind(&self) -> DataObjectKind {
    match self {
      Self::File(_) => DataObjectKind::File,
      Self::Array(_) => DataObjectKind::Array,
      Self::String(_) => DataObjectKind::String,
      Self::Integer(_) => DataObjectKind::Integer,
      Self::Boolean(_) => DataObjectKind::Boolean,
      Self::Json(_) => DataObjectKind::Json,
    }
  }

  /// Creation-time validation. Arrays must be homogeneous at every depth;
  /// all other variants are structurally valid by construction.
  pub fn validate(&self) -> Result<(), crate::ValidationError> {
    if let Self::Array(array) = self {
      array.verify_homogeneous()?;
      for element in &array.data_objects {
        element.validate()?;
      }
    }
    Ok(())
  }

  /// Whether this object can be materialized right now.
  ///
  /// Files are available iff some storage location is registered for their
  /// contents; arrays require every element to be available; scalars carry
  /// their value inline and are always available.
  pub fn is_available(&self, index: &dyn AvailabilityIndex) -> bool {
    match self {
      Self::File(file) => index.has_location(&file.file_contents),
      Self::Array(array) => array.data_objects.iter().all(|o| o.is_available(index)),
      Self::String(_) | Self::Integer(_) | Self::Boolean(_) | Self::Json(_) => true,
    }
  }
}

impl DataObjectArray {
  /// Build an array, rejecting mixed element kinds. Nothing is created on
  /// failure.
  pub fn new(data_objects: Vec<DataObject>) -> Result<Self, crate::ValidationError> {
    let array = Self { data_objects };
    array.verify_homogeneous()?;
    Ok(array)
  }

  fn verify_homogeneous(&self) -> Result<(), crate::ValidationError> {
    let mut kinds = self.data_objects.iter().map(DataObject::kind);
    if let Some(first) = kinds.next() {
      for kind in kinds {
        if kind != first {
          return Err(crate::ValidationError::HeterogeneousArray {
            expected: first,
            found: kind,
          });
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;
  use crate::ValidationError;

  struct FixedIndex(HashSet<FileContents>);

  impl AvailabilityIndex for FixedIndex {
    fn has_location(&self, contents: &FileContents) -> bool {
      self.0.contains(contents)
    }
  }

  fn file(name: &str, hash: &str) -> DataObject {
    DataObject::File(FileDataObject {
      file_name: name.to_string(),
      file_contents: FileContents {
        hash_function: HashFunction::Md5,
        hash_value: hash.to_string(),
      },
      metadata: BTreeMap::new(),
    })
  }

  fn string(value: &str) -> DataObject {
    DataObject::String(StringDataObject {
      string_value: value.to_string(),
    })
  }

  #[test]
  fn file_availability_tracks_location_index() {
    let object = file("a.txt", "abc123");
    let contents = FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "abc123".to_string(),
    };

    let empty = FixedIndex(HashSet::new());
    assert!(!object.is_available(&empty));

    let registered = FixedIndex(HashSet::from([contents]));
    assert!(object.is_available(&registered));
  }

  #[test]
  fn scalars_are_always_available() {
    let empty = FixedIndex(HashSet::new());
    assert!(string("x").is_available(&empty));
    assert!(
      DataObject::Integer(IntegerDataObject { integer_value: 7 }).is_available(&empty)
    );
    assert!(
      DataObject::Json(JsonDataObject {
        json_data: serde_json::json!({"k": [1, 2]}),
      })
      .is_available(&empty)
    );
  }

  #[test]
  fn heterogeneous_array_is_rejected() {
    let result = DataObjectArray::new(vec![file("a.txt", "aa"), string("b")]);
    assert_eq!(
      result.unwrap_err(),
      ValidationError::HeterogeneousArray {
        expected: DataObjectKind::File,
        found: DataObjectKind::String,
      }
    );
  }

  #[test]
  fn empty_array_is_valid_and_available() {
    let array = DataObjectArray::new(vec![]).unwrap();
    let object = DataObject::Array(array);
    object.validate().unwrap();
    assert!(object.is_available(&FixedIndex(HashSet::new())));
  }

  #[test]
  fn array_availability_requires_every_element() {
    let available = FileContents {
      hash_function: HashFunction::Md5,
      hash_value: "aa".to_string(),
    };
    let index = FixedIndex(HashSet::from([available]));

    let all_registered = DataObject::Array(
      DataObjectArray::new(vec![file("a.txt", "aa"), file("b.txt", "aa")]).unwrap(),
    );
    assert!(all_registered.is_available(&index));

    let one_missing = DataObject::Array(
      DataObjectArray::new(vec![file("a.txt", "aa"), file("c.txt", "cc")]).unwrap(),
    );
    assert!(!one_missing.is_available(&index));
  }

  #[test]
  fn nested_array_validation_recurses() {
    let inner = DataObject::Array(DataObjectArray {
      data_objects: vec![file("a.txt", "aa"), string("oops")],
    });
    let outer = DataObject::Array(DataObjectArray {
      data_objects: vec![inner],
    });
    assert!(outer.validate().is_err());
  }

  #[test]
  fn data_object_round_trips_through_json() {
    let objects = vec![
      file("a.txt", "aa"),
      DataObject::Array(DataObjectArray::new(vec![string("x"), string("y")]).unwrap()),
      string("hello"),
      DataObject::Integer(IntegerDataObject { integer_value: -3 }),
      DataObject::Boolean(BooleanDataObject { boolean_value: true }),
      DataObject::Json(JsonDataObject {
        json_data: serde_json::json!({"nested": {"list": [1, null]}}),
      }),
    ];
    for object in objects {
      let text = serde_json::to_string(&object).unwrap();
      let back: DataObject = serde_json::from_str(&text).unwrap();
      assert_eq!(back, object);
    }
  }

  #[test]
  fn file_serialization_carries_type_tag() {
    let text = serde_json::to_string(&file("a.txt", "aa")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "file");
    assert_eq!(value["file_contents"]["hash_function"], "md5");
  }
}
