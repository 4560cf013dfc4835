//! Save policy: is a classified change worth persisting?

use std::collections::BTreeSet;

use crate::snapshot::FieldRules;

#[derive(Debug, Clone)]
pub struct SavePolicy {
    transient: BTreeSet<String>,
    persist_system_changes: bool,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self::from_rules(&FieldRules::default())
    }
}

impl SavePolicy {
    pub fn from_rules(rules: &FieldRules) -> Self {
        Self {
            transient: rules.transient_fields().clone(),
            persist_system_changes: true,
        }
    }

    /// When false, reverts and agent output are never saved by the engine.
    pub fn with_system_changes(mut self, persist: bool) -> Self {
        self.persist_system_changes = persist;
        self
    }

    pub fn should_persist(&self, changed_fields: &BTreeSet<String>, is_human_change: bool) -> bool {
        if changed_fields.is_empty() {
            return false;
        }
        if !is_human_change && !self.persist_system_changes {
            return false;
        }
        changed_fields
            .iter()
            .any(|field| !self.transient.contains(field))
    }
}
