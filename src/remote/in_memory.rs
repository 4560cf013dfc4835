use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::snapshot::{BaselineDiff, DocumentId, Snapshot};

use super::document::{DocumentPatch, DocumentStore, StoredDocument};
use super::revision::{AuthorInfo, Revision, RevisionStore};

fn poisoned(operation: &str) -> StoreError {
    StoreError::Unavailable(format!("in-memory store lock poisoned during {operation}"))
}

/// Server timestamps must strictly increase even when the wall clock does not.
fn next_timestamp(previous: Option<SystemTime>) -> SystemTime {
    let now = SystemTime::now();
    match previous {
        Some(previous) if now <= previous => previous + Duration::from_micros(1),
        _ => now,
    }
}

/// In-memory document store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage).
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    storage: Arc<RwLock<HashMap<DocumentId, StoredDocument>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side write that bypasses the engine, e.g. another author.
    pub fn insert(&self, document_id: &DocumentId, snapshot: Snapshot) -> Result<StoredDocument, StoreError> {
        let mut storage = self.storage.write().map_err(|_| poisoned("insert"))?;
        let previous = storage.get(document_id);
        let document = StoredDocument {
            id: document_id.clone(),
            snapshot,
            updated_at: next_timestamp(previous.map(|doc| doc.updated_at)),
            current_revision_id: previous.and_then(|doc| doc.current_revision_id.clone()),
        };
        storage.insert(document_id.clone(), document.clone());
        Ok(document)
    }

    pub fn document(&self, document_id: &DocumentId) -> Option<StoredDocument> {
        self.storage
            .read()
            .ok()
            .and_then(|storage| storage.get(document_id).cloned())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, document_id: &DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        let storage = self.storage.read().map_err(|_| poisoned("get"))?;
        Ok(storage.get(document_id).cloned())
    }

    async fn update(
        &self,
        document_id: &DocumentId,
        patch: DocumentPatch,
    ) -> Result<StoredDocument, StoreError> {
        let mut storage = self.storage.write().map_err(|_| poisoned("update"))?;
        let document = storage
            .entry(document_id.clone())
            .or_insert_with(|| StoredDocument {
                id: document_id.clone(),
                snapshot: Snapshot::new(),
                updated_at: SystemTime::UNIX_EPOCH,
                current_revision_id: None,
            });
        patch.apply_to(&mut document.snapshot);
        if let Some(revision_id) = patch.current_revision_id {
            document.current_revision_id = Some(revision_id);
        }
        document.updated_at = next_timestamp(Some(document.updated_at));
        Ok(document.clone())
    }
}

#[derive(Default)]
struct RevisionLog {
    revisions: Vec<Revision>,
    head: Option<Snapshot>,
}

/// In-memory, append-only revision store.
///
/// A `create` whose baseline is not the current head is rejected with
/// `StoreError::Conflict`, so stale writers can never silently overwrite.
#[derive(Clone, Default)]
pub struct InMemoryRevisionStore {
    storage: Arc<RwLock<HashMap<DocumentId, RevisionLog>>>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the initial revision (version 1) of a document.
    pub fn seed(&self, document_id: &DocumentId, snapshot: Snapshot) -> Result<Revision, StoreError> {
        let mut storage = self.storage.write().map_err(|_| poisoned("seed"))?;
        let log = storage.entry(document_id.clone()).or_default();
        let revision = append(log, document_id, &Snapshot::new(), snapshot, None);
        Ok(revision)
    }

    pub fn head(&self, document_id: &DocumentId) -> Option<Snapshot> {
        self.storage
            .read()
            .ok()
            .and_then(|storage| storage.get(document_id).and_then(|log| log.head.clone()))
    }

    /// Revisions oldest first; handy in assertions.
    pub fn history(&self, document_id: &DocumentId) -> Vec<Revision> {
        self.storage
            .read()
            .ok()
            .and_then(|storage| storage.get(document_id).map(|log| log.revisions.clone()))
            .unwrap_or_default()
    }
}

fn append(
    log: &mut RevisionLog,
    document_id: &DocumentId,
    baseline: &Snapshot,
    snapshot: Snapshot,
    author: Option<AuthorInfo>,
) -> Revision {
    let version = log.revisions.last().map(|rev| rev.version).unwrap_or(0) + 1;
    let revision = Revision {
        id: format!("{}:v{}", document_id, version),
        document_id: document_id.clone(),
        version,
        baseline_diff: BaselineDiff::between(baseline, &snapshot),
        author,
        created_at: SystemTime::now(),
    };
    log.revisions.push(revision.clone());
    log.head = Some(snapshot);
    revision
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn create(
        &self,
        document_id: &DocumentId,
        baseline: &Snapshot,
        snapshot: &Snapshot,
        author: Option<AuthorInfo>,
    ) -> Result<Option<Revision>, StoreError> {
        let mut storage = self.storage.write().map_err(|_| poisoned("create"))?;
        let log = storage.entry(document_id.clone()).or_default();
        if let Some(head) = &log.head {
            if head != baseline {
                return Err(StoreError::Conflict {
                    document_id: document_id.to_string(),
                    remote_updated_at: log.revisions.last().map(|rev| rev.created_at),
                });
            }
        }
        if BaselineDiff::between(baseline, snapshot).is_empty() {
            return Ok(None);
        }
        Ok(Some(append(log, document_id, baseline, snapshot.clone(), author)))
    }

    async fn list(&self, document_id: &DocumentId) -> Result<Vec<Revision>, StoreError> {
        let storage = self.storage.read().map_err(|_| poisoned("list"))?;
        let mut revisions = storage
            .get(document_id)
            .map(|log| log.revisions.clone())
            .unwrap_or_default();
        revisions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(revisions)
    }
}
