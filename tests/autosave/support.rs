//! Test doubles and a harness wiring an engine to in-memory collaborators.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autosave_rust::{
    AuthorInfo, AutosaveEngine, ConnectivityMonitor, DocumentId, DocumentPatch, DocumentStore,
    InMemoryDocumentStore, InMemoryKvStore, InMemoryRevisionStore, Revision, RevisionStore,
    Snapshot, StoreError, StoredDocument,
};

pub fn doc(id: &str) -> DocumentId {
    DocumentId::new(id).unwrap()
}

pub fn title(value: &str) -> Snapshot {
    Snapshot::new().with("title", value)
}

/// Let spawned tasks run; with paused time this also fires due timers.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// How `ScriptedRevisions::create` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Pass,
    FailTimes(u32),
    FailAlways,
    Hang,
    Delay(Duration),
}

/// Revision store wrapper that can fail, hang or slow down on demand and
/// counts what it was asked to do.
#[derive(Clone)]
pub struct ScriptedRevisions {
    pub inner: InMemoryRevisionStore,
    behavior: Arc<Mutex<Behavior>>,
    creates: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedRevisions {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRevisionStore::new(),
            behavior: Arc::new(Mutex::new(Behavior::Pass)),
            creates: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Highest number of `create` calls that were running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn history(&self, document_id: &DocumentId) -> Vec<Revision> {
        self.inner.history(document_id)
    }

    fn next_behavior(&self) -> Behavior {
        let mut behavior = self.behavior.lock().unwrap();
        let current = *behavior;
        if let Behavior::FailTimes(remaining) = current {
            *behavior = if remaining <= 1 {
                Behavior::Pass
            } else {
                Behavior::FailTimes(remaining - 1)
            };
        }
        current
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RevisionStore for ScriptedRevisions {
    async fn create(
        &self,
        document_id: &DocumentId,
        baseline: &Snapshot,
        snapshot: &Snapshot,
        author: Option<AuthorInfo>,
    ) -> Result<Option<Revision>, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        match self.next_behavior() {
            Behavior::Pass => {}
            Behavior::FailTimes(_) | Behavior::FailAlways => {
                return Err(StoreError::Unavailable("503 service unavailable".into()));
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Delay(delay) => tokio::time::sleep(delay).await,
        }
        self.inner.create(document_id, baseline, snapshot, author).await
    }

    async fn list(&self, document_id: &DocumentId) -> Result<Vec<Revision>, StoreError> {
        self.inner.list(document_id).await
    }
}

/// Document store wrapper counting every call.
#[derive(Clone, Default)]
pub struct CountingDocuments {
    pub inner: InMemoryDocumentStore,
    calls: Arc<AtomicUsize>,
}

impl CountingDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingDocuments {
    async fn get(&self, document_id: &DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(document_id).await
    }

    async fn update(
        &self,
        document_id: &DocumentId,
        patch: DocumentPatch,
    ) -> Result<StoredDocument, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update(document_id, patch).await
    }
}

/// An engine plus handles on everything it talks to.
pub struct Harness {
    pub engine: AutosaveEngine,
    pub documents: CountingDocuments,
    pub revisions: ScriptedRevisions,
    pub storage: InMemoryKvStore,
    pub connectivity: ConnectivityMonitor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            CountingDocuments::new(),
            ScriptedRevisions::new(),
            InMemoryKvStore::new(),
            ConnectivityMonitor::new(true),
        )
    }

    pub fn offline() -> Self {
        Self::with_parts(
            CountingDocuments::new(),
            ScriptedRevisions::new(),
            InMemoryKvStore::new(),
            ConnectivityMonitor::new(false),
        )
    }

    /// A fresh engine over existing stores, as after a process restart.
    pub fn restart(&self, connectivity: ConnectivityMonitor) -> Self {
        Self::with_parts(
            self.documents.clone(),
            self.revisions.clone(),
            self.storage.clone(),
            connectivity,
        )
    }

    pub fn with_parts(
        documents: CountingDocuments,
        revisions: ScriptedRevisions,
        storage: InMemoryKvStore,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let engine = AutosaveEngine::new(Arc::new(documents.clone()), Arc::new(revisions.clone()))
            .with_storage(Arc::new(storage.clone()))
            .with_connectivity(connectivity.clone());
        Self {
            engine,
            documents,
            revisions,
            storage,
            connectivity,
        }
    }

    /// Seed both remote stores with `snapshot` as version 1.
    pub fn seed_remote(&self, document_id: &DocumentId, snapshot: Snapshot) {
        self.documents.inner.insert(document_id, snapshot.clone()).unwrap();
        self.revisions.inner.seed(document_id, snapshot).unwrap();
    }

    /// Titles of the stored revisions, oldest first.
    pub fn titles(&self, document_id: &DocumentId) -> Vec<String> {
        let mut current = Snapshot::new();
        self.revisions
            .history(document_id)
            .iter()
            .map(|revision| {
                current = revision.baseline_diff.apply(&current);
                current
                    .get("title")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}
