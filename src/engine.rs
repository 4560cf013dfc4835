use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::AutosaveConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::orchestrator::{DocumentHandle, DocumentSaver, HandleParts, SaveState, SaverParts};
use crate::queue::{BaselineCache, LocalQueue, QueueSweeper};
use crate::remote::{DocumentStore, RevisionStore};
use crate::scheduler::Debouncer;
use crate::snapshot::{Baseline, DocumentId, Snapshot};
use crate::storage::{InMemoryKvStore, KvStore};

/// Registry of open documents and the wiring between their collaborators.
///
/// At most one document task runs per document id; opening an already open
/// document returns the existing handle. Documents share nothing but the
/// local store, the remote clients and the connectivity signal.
pub struct AutosaveEngine {
    documents: Arc<dyn DocumentStore>,
    revisions: Arc<dyn RevisionStore>,
    storage: Arc<dyn KvStore>,
    queue: Arc<LocalQueue>,
    baselines: BaselineCache,
    config: AutosaveConfig,
    connectivity: ConnectivityMonitor,
    handles: Mutex<HashMap<DocumentId, DocumentHandle>>,
}

impl AutosaveEngine {
    /// Engine with default config, in-memory local storage and an online
    /// connectivity signal.
    pub fn new(documents: Arc<dyn DocumentStore>, revisions: Arc<dyn RevisionStore>) -> Self {
        let storage: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = AutosaveConfig::default();
        Self {
            documents,
            revisions,
            queue: Arc::new(LocalQueue::new(Arc::clone(&storage), config.queue.clone())),
            baselines: BaselineCache::new(Arc::clone(&storage)),
            storage,
            config,
            connectivity: ConnectivityMonitor::default(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Use `storage` for the local queue and the baseline cache.
    pub fn with_storage(mut self, storage: Arc<dyn KvStore>) -> Self {
        self.storage = storage;
        self.rebuild_local();
        self
    }

    pub fn with_config(mut self, config: AutosaveConfig) -> Self {
        self.config = config;
        self.rebuild_local();
        self
    }

    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    fn rebuild_local(&mut self) {
        self.queue = Arc::new(LocalQueue::new(
            Arc::clone(&self.storage),
            self.config.queue.clone(),
        ));
        self.baselines = BaselineCache::new(Arc::clone(&self.storage));
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn queue(&self) -> &Arc<LocalQueue> {
        &self.queue
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    /// Open `document_id`, seeding its baseline from the document store.
    ///
    /// When the store is unreachable the cached baseline is used, so a
    /// restart while offline can still diff and resume queued changes.
    pub async fn open(&self, document_id: DocumentId) -> DocumentHandle {
        if let Some(handle) = self.handle(&document_id) {
            return handle;
        }

        let rules = self.config.fields.rules();
        let baseline = match self.documents.get(&document_id).await {
            Ok(Some(document)) => {
                let baseline = Baseline::new(
                    rules.persisted(&document.snapshot),
                    Some(document.updated_at),
                );
                if let Err(err) = self.baselines.store(&document_id, &baseline) {
                    warn!(document_id = %document_id, error = %err, "could not cache baseline");
                }
                baseline
            }
            Ok(None) => self.baselines.load(&document_id).unwrap_or_default(),
            Err(err) => {
                warn!(
                    document_id = %document_id,
                    error = %err,
                    "document store unavailable, using cached baseline"
                );
                self.baselines.load(&document_id).unwrap_or_default()
            }
        };

        self.open_seeded(document_id, baseline)
    }

    /// Open `document_id` with a caller-supplied baseline, without asking
    /// the document store.
    pub fn open_with_baseline(&self, document_id: DocumentId, snapshot: Snapshot) -> DocumentHandle {
        let rules = self.config.fields.rules();
        let baseline = Baseline::new(rules.persisted(&snapshot), None);
        if let Some(handle) = self.handle(&document_id) {
            return handle;
        }
        if let Err(err) = self.baselines.store(&document_id, &baseline) {
            warn!(document_id = %document_id, error = %err, "could not cache baseline");
        }
        self.open_seeded(document_id, baseline)
    }

    /// The open handle for `document_id`, if any.
    pub fn handle(&self, document_id: &DocumentId) -> Option<DocumentHandle> {
        let mut handles = self.lock_handles();
        match handles.get(document_id) {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            Some(_) => {
                handles.remove(document_id);
                None
            }
            None => None,
        }
    }

    /// Open every document that has changes waiting in the local queue.
    pub async fn resume_pending(&self) -> Vec<DocumentHandle> {
        let documents = match self.queue.documents() {
            Ok(documents) => documents,
            Err(err) => {
                warn!(error = %err, "could not list pending documents");
                return Vec::new();
            }
        };
        if !documents.is_empty() {
            info!(count = documents.len(), "resuming documents with pending changes");
        }
        let mut handles = Vec::with_capacity(documents.len());
        for document_id in documents {
            handles.push(self.open(document_id).await);
        }
        handles
    }

    /// Stop the task of `document_id`. Returns false if it was not open.
    pub async fn close(&self, document_id: &DocumentId) -> bool {
        let handle = self.lock_handles().remove(document_id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every document task.
    pub async fn shutdown(&self) {
        let handles: Vec<DocumentHandle> = self.lock_handles().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown().await;
        }
        debug!("autosave engine shut down");
    }

    /// Start the periodic retention sweep of the local queue.
    pub fn spawn_sweeper(&self) -> QueueSweeper {
        QueueSweeper::spawn(Arc::clone(&self.queue), self.config.queue.sweep_interval())
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<DocumentId, DocumentHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_seeded(&self, document_id: DocumentId, baseline: Baseline) -> DocumentHandle {
        let mut handles = self.lock_handles();
        if let Some(handle) = handles.get(&document_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let next_sequence = match self.queue.next_sequence(&document_id) {
            Ok(sequence) => sequence,
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "could not read local queue");
                1
            }
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (baseline_tx, baseline_rx) = watch::channel(Arc::new(baseline));
        let (state_tx, state_rx) = watch::channel(SaveState::default());
        let rules = self.config.fields.rules();

        let (saver, completions_rx) = DocumentSaver::new(SaverParts {
            document_id: document_id.clone(),
            documents: Arc::clone(&self.documents),
            revisions: Arc::clone(&self.revisions),
            queue: Arc::clone(&self.queue),
            baselines: self.baselines.clone(),
            rules: rules.clone(),
            debouncer: Debouncer::from_config(&self.config.scheduler),
            save_config: self.config.save.clone(),
            online: self.connectivity.is_online(),
            baseline_tx,
            state_tx,
        });
        let task = tokio::spawn(saver.run(
            commands_rx,
            completions_rx,
            self.connectivity.subscribe(),
        ));

        let handle = DocumentHandle::new(HandleParts {
            document_id: document_id.clone(),
            commands: commands_tx,
            state_rx,
            baseline_rx,
            queue: Arc::clone(&self.queue),
            documents: Arc::clone(&self.documents),
            revisions: Arc::clone(&self.revisions),
            rules,
            policy: self.config.fields.policy(),
            max_snapshot_bytes: self.config.save.max_snapshot_bytes,
            next_sequence,
            task,
        });
        debug!(document_id = %document_id, "document opened");
        handles.insert(document_id, handle.clone());
        handle
    }
}

