use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SaveError;

/// Stable identifier of one editable document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, SaveError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SaveError::Validation("document id must not be empty".into()));
        }
        Ok(DocumentId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The editable state of one document at one instant.
///
/// Fields are kept in a `BTreeMap` so the JSON encoding is canonical: two
/// snapshots with equal fields always encode to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    fields: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&String, &mut Value) -> bool,
    {
        self.fields.retain(keep);
    }

    /// Canonical JSON encoding of every field.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        // A string-keyed map of JSON values always serializes.
        serde_json::to_vec(&self.fields).unwrap_or_default()
    }

    /// Reject snapshots the remote store could never accept.
    pub fn validate(&self, max_bytes: usize) -> Result<(), SaveError> {
        if self.fields.keys().any(|field| field.trim().is_empty()) {
            return Err(SaveError::Validation("field names must not be empty".into()));
        }
        let size = self.to_canonical_bytes().len();
        if size > max_bytes {
            return Err(SaveError::Validation(format!(
                "snapshot is {size} bytes, limit is {max_bytes}"
            )));
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for Snapshot {
    fn from(map: Map<String, Value>) -> Self {
        Snapshot {
            fields: map.into_iter().collect(),
        }
    }
}

impl TryFrom<Value> for Snapshot {
    type Error = SaveError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(SaveError::Validation(format!(
                "snapshot must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Snapshot {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The last snapshot known to be persisted remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub snapshot: Snapshot,
    /// Server-assigned modification time of the document, when known.
    pub updated_at: Option<SystemTime>,
}

impl Baseline {
    pub fn new(snapshot: Snapshot, updated_at: Option<SystemTime>) -> Self {
        Self {
            snapshot,
            updated_at,
        }
    }
}
