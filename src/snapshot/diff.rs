use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Snapshot;

/// Field-level difference between a baseline and a newer snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineDiff {
    /// Fields added or modified, with their new value.
    pub changed: BTreeMap<String, Value>,
    /// Fields present in the baseline but absent from the new snapshot.
    pub removed: BTreeSet<String>,
}

impl BaselineDiff {
    pub fn between(baseline: &Snapshot, snapshot: &Snapshot) -> Self {
        let changed = snapshot
            .iter()
            .filter(|(field, value)| baseline.get(field) != Some(*value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        let removed = baseline
            .keys()
            .filter(|field| !snapshot.contains(field))
            .cloned()
            .collect();
        BaselineDiff { changed, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn fields(&self) -> BTreeSet<String> {
        self.changed
            .keys()
            .chain(self.removed.iter())
            .cloned()
            .collect()
    }

    /// Rebuild the newer snapshot from the baseline.
    pub fn apply(&self, baseline: &Snapshot) -> Snapshot {
        let mut result = baseline.clone();
        for field in &self.removed {
            result.remove(field);
        }
        for (field, value) in &self.changed {
            result.insert(field.clone(), value.clone());
        }
        result
    }
}
