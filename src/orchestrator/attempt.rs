use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::SaveError;
use crate::remote::{AuthorInfo, DocumentPatch, DocumentStore, Revision, RevisionStore};
use crate::snapshot::{Baseline, BaselineDiff, DocumentId, Snapshot};

/// Result of one successful remote save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    /// `None` when the revision store found no meaningful difference.
    pub revision: Option<Revision>,
    /// Server timestamp of the document after the save.
    pub updated_at: SystemTime,
}

/// One remote write of one snapshot, computed against one baseline.
pub(crate) struct SaveAttempt {
    pub documents: Arc<dyn DocumentStore>,
    pub revisions: Arc<dyn RevisionStore>,
    pub document_id: DocumentId,
    pub baseline: Baseline,
    pub snapshot: Snapshot,
    pub author: Option<AuthorInfo>,
    /// Snapshots this engine may have written without confirmation. A remote
    /// document matching one of these is not someone else's change.
    pub unconfirmed: Vec<Snapshot>,
}

impl SaveAttempt {
    pub async fn run(self) -> Result<SaveReceipt, SaveError> {
        self.check_conflict().await?;

        let diff = BaselineDiff::between(&self.baseline.snapshot, &self.snapshot);
        let document = self
            .documents
            .update(&self.document_id, DocumentPatch::from_diff(&diff))
            .await?;
        let mut updated_at = document.updated_at;

        let revision = self
            .revisions
            .create(
                &self.document_id,
                &self.baseline.snapshot,
                &self.snapshot,
                self.author.clone(),
            )
            .await?;

        if let Some(revision) = &revision {
            match self
                .documents
                .update(&self.document_id, DocumentPatch::pointer(revision.id.clone()))
                .await
            {
                Ok(document) => updated_at = document.updated_at,
                Err(err) => warn!(
                    document_id = %self.document_id,
                    revision_id = %revision.id,
                    error = %err,
                    "revision saved but document pointer was not updated"
                ),
            }
        }

        Ok(SaveReceipt {
            revision,
            updated_at,
        })
    }

    /// Refuse to overwrite a document that moved on since our baseline.
    async fn check_conflict(&self) -> Result<(), SaveError> {
        let Some(remote) = self.documents.get(&self.document_id).await? else {
            return Ok(());
        };
        let newer = match self.baseline.updated_at {
            Some(known) => remote.updated_at > known,
            None => true,
        };
        if !newer
            || remote.snapshot == self.baseline.snapshot
            || self.unconfirmed.iter().any(|written| *written == remote.snapshot)
        {
            return Ok(());
        }
        debug!(document_id = %self.document_id, "remote document is newer than baseline");
        Err(SaveError::Conflict {
            document_id: self.document_id.to_string(),
            remote_updated_at: Some(remote.updated_at),
        })
    }
}
