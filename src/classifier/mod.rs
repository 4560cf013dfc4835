//! Change classification: which fields changed, and who changed them.
//!
//! `classify` is a pure function. It never touches storage or the network,
//! and returns the same descriptor for the same inputs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::snapshot::{FieldRules, Snapshot};

/// Hints supplied by the caller about where a change came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
    /// Set when the content was produced by an agent in response to a message.
    pub origin_message_id: Option<String>,
    /// Set when the content was restored from an existing revision.
    pub origin_revision_id: Option<String>,
    pub is_revert: bool,
    pub is_initial_load: bool,
    pub acting_user_id: Option<String>,
}

impl ChangeContext {
    /// A keystroke-level edit by a person.
    pub fn human(user_id: impl Into<String>) -> Self {
        Self {
            acting_user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn revert(revision_id: impl Into<String>) -> Self {
        Self {
            origin_revision_id: Some(revision_id.into()),
            is_revert: true,
            ..Default::default()
        }
    }

    pub fn initial_load() -> Self {
        Self {
            is_initial_load: true,
            ..Default::default()
        }
    }

    pub fn agent(message_id: impl Into<String>) -> Self {
        Self {
            origin_message_id: Some(message_id.into()),
            ..Default::default()
        }
    }

    pub fn origin(&self) -> ChangeOrigin {
        if self.is_initial_load {
            ChangeOrigin::InitialLoad
        } else if self.is_revert || self.origin_revision_id.is_some() {
            ChangeOrigin::Revert
        } else if self.origin_message_id.is_some() {
            ChangeOrigin::Agent
        } else {
            ChangeOrigin::Human
        }
    }
}

/// Where a change came from. Only `Human` changes are attributed to an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Human,
    Revert,
    InitialLoad,
    Agent,
}

impl ChangeOrigin {
    pub fn is_human(self) -> bool {
        self == ChangeOrigin::Human
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub changed_fields: BTreeSet<String>,
    pub is_human_change: bool,
    pub has_changes: bool,
    pub origin: ChangeOrigin,
}

/// Compare `next` against `previous` under `rules`.
pub fn classify(
    previous: &Snapshot,
    next: &Snapshot,
    context: &ChangeContext,
    rules: &FieldRules,
) -> ChangeDescriptor {
    let changed_fields = changed_fields(previous, next, rules);
    let origin = context.origin();
    ChangeDescriptor {
        has_changes: !changed_fields.is_empty(),
        changed_fields,
        is_human_change: origin.is_human(),
        origin,
    }
}

/// Non-transient fields whose value differs, including added and removed ones.
pub fn changed_fields(previous: &Snapshot, next: &Snapshot, rules: &FieldRules) -> BTreeSet<String> {
    previous
        .keys()
        .chain(next.keys())
        .filter(|field| !rules.is_transient(field))
        .filter(|field| !rules.same_value(field, previous.get(field), next.get(field)))
        .cloned()
        .collect()
}
