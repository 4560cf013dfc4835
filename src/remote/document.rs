use std::collections::BTreeSet;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::snapshot::{BaselineDiff, DocumentId, Snapshot};

/// A document as held by the remote document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub snapshot: Snapshot,
    /// Server-assigned; strictly increases on every update.
    pub updated_at: SystemTime,
    pub current_revision_id: Option<String>,
}

/// Partial update applied with last-writer-wins semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    pub fields: Snapshot,
    pub removed: BTreeSet<String>,
    pub current_revision_id: Option<String>,
}

impl DocumentPatch {
    pub fn from_diff(diff: &BaselineDiff) -> Self {
        Self {
            fields: diff
                .changed
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
            removed: diff.removed.clone(),
            current_revision_id: None,
        }
    }

    /// Patch that only moves the document's revision pointer.
    pub fn pointer(revision_id: impl Into<String>) -> Self {
        Self {
            current_revision_id: Some(revision_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.removed.is_empty() && self.current_revision_id.is_none()
    }

    pub fn apply_to(&self, snapshot: &mut Snapshot) {
        for field in &self.removed {
            snapshot.remove(field);
        }
        for (field, value) in self.fields.iter() {
            snapshot.insert(field.clone(), value.clone());
        }
    }
}

/// Remote, last-writer-wins document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &DocumentId) -> Result<Option<StoredDocument>, StoreError>;

    /// Apply `patch`, creating the document if it does not exist yet.
    async fn update(
        &self,
        document_id: &DocumentId,
        patch: DocumentPatch,
    ) -> Result<StoredDocument, StoreError>;
}
