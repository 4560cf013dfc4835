use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::snapshot::{BaselineDiff, DocumentId, Snapshot};

/// Attribution attached to revisions produced by human edits.
///
/// System changes (reverts, initial loads, agent output) carry no author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub user_id: Option<String>,
}

impl AuthorInfo {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }
}

/// Immutable, versioned record of one saved change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub document_id: DocumentId,
    /// Server-assigned, strictly increasing per document.
    pub version: u64,
    pub baseline_diff: BaselineDiff,
    pub author: Option<AuthorInfo>,
    pub created_at: SystemTime,
}

impl Revision {
    pub fn is_human_change(&self) -> bool {
        self.author.is_some()
    }
}

/// Remote, append-only revision storage.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Record the change from `baseline` to `snapshot`. Returns `None` when
    /// there is no meaningful difference and no revision was created.
    async fn create(
        &self,
        document_id: &DocumentId,
        baseline: &Snapshot,
        snapshot: &Snapshot,
        author: Option<AuthorInfo>,
    ) -> Result<Option<Revision>, StoreError>;

    /// Revisions of `document_id`, newest version first.
    async fn list(&self, document_id: &DocumentId) -> Result<Vec<Revision>, StoreError>;
}
