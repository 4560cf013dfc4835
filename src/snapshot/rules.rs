use std::borrow::Cow;
use std::collections::BTreeSet;

use serde_json::Value;

use super::Snapshot;

/// Fields that are UI-only by default and never persisted.
pub const DEFAULT_TRANSIENT_FIELDS: &[&str] = &[
    "cursor",
    "selection",
    "scroll_position",
    "is_focused",
    "is_editing",
];

/// Text fields whose trailing whitespace does not count as an edit by default.
pub const DEFAULT_WHITESPACE_INSENSITIVE_FIELDS: &[&str] = &["content", "title"];

/// Which fields take part in persistence and how they are compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRules {
    transient: BTreeSet<String>,
    whitespace_insensitive: BTreeSet<String>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRANSIENT_FIELDS.iter().copied(),
            DEFAULT_WHITESPACE_INSENSITIVE_FIELDS.iter().copied(),
        )
    }
}

impl FieldRules {
    pub fn new<T, W>(transient: T, whitespace_insensitive: W) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            transient: transient.into_iter().map(Into::into).collect(),
            whitespace_insensitive: whitespace_insensitive.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_transient(&self, field: &str) -> bool {
        self.transient.contains(field)
    }

    pub fn transient_fields(&self) -> &BTreeSet<String> {
        &self.transient
    }

    /// Value as used for comparison. Whitespace-insensitive string fields
    /// lose their trailing whitespace.
    pub fn normalized<'a>(&self, field: &str, value: &'a Value) -> Cow<'a, Value> {
        match value {
            Value::String(text) if self.whitespace_insensitive.contains(field) => {
                let trimmed = text.trim_end();
                if trimmed.len() == text.len() {
                    Cow::Borrowed(value)
                } else {
                    Cow::Owned(Value::String(trimmed.to_string()))
                }
            }
            _ => Cow::Borrowed(value),
        }
    }

    pub fn same_value(&self, field: &str, a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.normalized(field, a) == self.normalized(field, b),
            _ => false,
        }
    }

    /// The snapshot without transient fields; this is what gets saved.
    pub fn persisted(&self, snapshot: &Snapshot) -> Snapshot {
        let mut persisted = snapshot.clone();
        persisted.retain(|field, _| !self.is_transient(field));
        persisted
    }

    /// Canonical bytes of the persisted, normalized projection. Two snapshots
    /// are "byte-identical" for saving purposes when these match.
    pub fn canonical_bytes(&self, snapshot: &Snapshot) -> Vec<u8> {
        let projected: std::collections::BTreeMap<&str, Cow<'_, Value>> = snapshot
            .iter()
            .filter(|(field, _)| !self.is_transient(field))
            .map(|(field, value)| (field.as_str(), self.normalized(field, value)))
            .collect();
        serde_json::to_vec(&projected).unwrap_or_default()
    }

    pub fn identical(&self, a: &Snapshot, b: &Snapshot) -> bool {
        self.canonical_bytes(a) == self.canonical_bytes(b)
    }
}
