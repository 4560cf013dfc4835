use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::classifier::{classify, ChangeContext, ChangeDescriptor, ChangeOrigin};
use crate::error::SaveError;
use crate::policy::SavePolicy;
use crate::queue::{LocalQueue, PendingEntry};
use crate::remote::{AuthorInfo, DocumentStore, Revision, RevisionStore};
use crate::snapshot::{Baseline, DocumentId, FieldRules, Snapshot};

use super::saver::{Command, PendingSave};
use super::state::SaveState;

/// What `process_change` did with a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    /// Recorded and scheduled for saving.
    Scheduled(ChangeDescriptor),
    /// Nothing worth saving.
    Ignored(ChangeDescriptor),
    /// Initial load; the baseline was replaced.
    Seeded,
    Rejected(SaveError),
    /// The document was closed.
    Closed,
}

impl ChangeOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ChangeOutcome::Scheduled(_))
    }
}

pub(crate) struct HandleParts {
    pub document_id: DocumentId,
    pub commands: mpsc::UnboundedSender<Command>,
    pub state_rx: watch::Receiver<SaveState>,
    pub baseline_rx: watch::Receiver<Arc<Baseline>>,
    pub queue: Arc<LocalQueue>,
    pub documents: Arc<dyn DocumentStore>,
    pub revisions: Arc<dyn RevisionStore>,
    pub rules: FieldRules,
    pub policy: SavePolicy,
    pub max_snapshot_bytes: usize,
    pub next_sequence: u64,
    pub task: JoinHandle<()>,
}

struct Inner {
    document_id: DocumentId,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SaveState>,
    baseline_rx: watch::Receiver<Arc<Baseline>>,
    queue: Arc<LocalQueue>,
    documents: Arc<dyn DocumentStore>,
    revisions: Arc<dyn RevisionStore>,
    rules: FieldRules,
    policy: SavePolicy,
    max_snapshot_bytes: usize,
    sequence: AtomicU64,
    /// Orders queue writes with the commands that reference them.
    record_lock: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Caller-facing handle to one open document.
///
/// Cheap to clone; every clone drives the same document task. Entry points
/// never panic and never return runtime errors: failures show up in
/// [`SaveState`] or as a [`ChangeOutcome`].
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<Inner>,
}

impl DocumentHandle {
    pub(crate) fn new(parts: HandleParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                document_id: parts.document_id,
                commands: parts.commands,
                state_rx: parts.state_rx,
                baseline_rx: parts.baseline_rx,
                queue: parts.queue,
                documents: parts.documents,
                revisions: parts.revisions,
                rules: parts.rules,
                policy: parts.policy,
                max_snapshot_bytes: parts.max_snapshot_bytes,
                sequence: AtomicU64::new(parts.next_sequence),
                record_lock: Mutex::new(()),
                task: Mutex::new(Some(parts.task)),
            }),
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.inner.document_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }

    /// Feed a new snapshot of the document.
    ///
    /// Human changes worth saving are written to the local queue before this
    /// returns; the remote save is scheduled on the document task.
    pub fn process_change(&self, snapshot: Snapshot, context: &ChangeContext) -> ChangeOutcome {
        if self.is_closed() {
            return ChangeOutcome::Closed;
        }
        if let Err(err) = snapshot.validate(self.inner.max_snapshot_bytes) {
            self.send(Command::Reject(err.clone()));
            return ChangeOutcome::Rejected(err);
        }

        let persisted = self.inner.rules.persisted(&snapshot);
        if context.origin() == ChangeOrigin::InitialLoad {
            return if self.send(Command::Seed(Baseline::new(persisted, None))) {
                ChangeOutcome::Seeded
            } else {
                ChangeOutcome::Closed
            };
        }

        let baseline = self.baseline();
        let descriptor = classify(&baseline.snapshot, &snapshot, context, &self.inner.rules);
        let persist = self
            .inner
            .policy
            .should_persist(&descriptor.changed_fields, descriptor.is_human_change);
        if descriptor.has_changes && !persist {
            return ChangeOutcome::Ignored(descriptor);
        }

        let author = descriptor
            .is_human_change
            .then(|| AuthorInfo::new(context.acting_user_id.clone()));
        let sent = {
            let _guard = self.lock_records();
            let save = self.record(persisted, author, descriptor.is_human_change, persist);
            if persist {
                self.send(Command::Change(save))
            } else {
                self.send(Command::Settle(save))
            }
        };

        match (sent, persist) {
            (false, _) => ChangeOutcome::Closed,
            (true, true) => ChangeOutcome::Scheduled(descriptor),
            (true, false) => ChangeOutcome::Ignored(descriptor),
        }
    }

    /// Save `snapshot` now, bypassing the debounce delay.
    ///
    /// Resolves with the outcome of the attempt that carries the snapshot:
    /// false on failure, watchdog timeout, offline or shutdown.
    pub async fn force_save(&self, snapshot: Snapshot) -> bool {
        self.force_save_with(snapshot, &ChangeContext::default()).await
    }

    pub async fn force_save_with(&self, snapshot: Snapshot, context: &ChangeContext) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Err(err) = snapshot.validate(self.inner.max_snapshot_bytes) {
            self.send(Command::Reject(err));
            return false;
        }
        let persisted = self.inner.rules.persisted(&snapshot);
        let baseline = self.baseline();
        let descriptor = classify(&baseline.snapshot, &snapshot, context, &self.inner.rules);

        let (reply, outcome) = oneshot::channel();
        let sent = {
            let _guard = self.lock_records();
            // Recorded even without changes: it supersedes any pending snapshot,
            // and the task short-circuits it against the baseline.
            let author = (descriptor.has_changes && descriptor.is_human_change)
                .then(|| AuthorInfo::new(context.acting_user_id.clone()));
            let save = self.record(
                persisted,
                author,
                descriptor.is_human_change,
                descriptor.has_changes,
            );
            self.send(Command::ForceSave { save, reply })
        };
        if !sent {
            return false;
        }
        outcome.await.unwrap_or(false)
    }

    pub fn state(&self) -> SaveState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.inner.state_rx.clone()
    }

    /// Every published state, starting with the current one.
    pub fn state_stream(&self) -> WatchStream<SaveState> {
        WatchStream::new(self.inner.state_rx.clone())
    }

    /// Reflects every change the document task has processed so far.
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.state_rx.borrow().has_unsaved_changes
    }

    /// Drop pending work: the local queue entry is removed before this
    /// returns, and nothing pending will be saved.
    pub fn clear_unsaved_changes(&self) {
        {
            let _guard = self.lock_records();
            if let Err(err) = self.inner.queue.clear(&self.inner.document_id) {
                warn!(document_id = %self.inner.document_id, error = %err, "could not clear local queue");
            }
        }
        self.send(Command::ClearUnsaved);
    }

    /// Retry a failed save. Does not reset the retry counter.
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Re-seed the baseline from the document store, discarding local work.
    ///
    /// This is how a conflict is resolved: the caller reloads the editor from
    /// [`DocumentHandle::baseline`] afterwards.
    pub async fn reload_baseline(&self) -> bool {
        let document = match self.inner.documents.get(&self.inner.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return false,
            Err(err) => {
                warn!(document_id = %self.inner.document_id, error = %err, "could not reload baseline");
                return false;
            }
        };
        let baseline = Baseline::new(
            self.inner.rules.persisted(&document.snapshot),
            Some(document.updated_at),
        );
        let _guard = self.lock_records();
        if let Err(err) = self.inner.queue.clear(&self.inner.document_id) {
            warn!(document_id = %self.inner.document_id, error = %err, "could not clear local queue");
        }
        self.send(Command::Reload(baseline))
    }

    /// The confirmed baseline as last published by the document task.
    pub fn baseline(&self) -> Arc<Baseline> {
        Arc::clone(&self.inner.baseline_rx.borrow())
    }

    /// Revision history, newest first.
    pub async fn revisions(&self) -> Result<Vec<Revision>, SaveError> {
        Ok(self.inner.revisions.list(&self.inner.document_id).await?)
    }

    /// Stop the document task and wait for it. Pending force saves resolve
    /// to false; queued entries stay in local storage.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let task = match self.inner.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(document_id = %self.inner.document_id, error = %err, "document task ended abnormally");
            }
        }
    }

    fn send(&self, command: Command) -> bool {
        self.inner.commands.send(command).is_ok()
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .record_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assign a sequence and write the local queue entry when required.
    ///
    /// Human changes are always queued. Other changes are queued only when
    /// they supersede an entry that is already there.
    fn record(
        &self,
        snapshot: Snapshot,
        author: Option<AuthorInfo>,
        is_human: bool,
        persist: bool,
    ) -> PendingSave {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let queued = match self.inner.queue.latest(&self.inner.document_id) {
            Ok(existing) => existing.is_some(),
            Err(err) => {
                warn!(document_id = %self.inner.document_id, error = %err, "could not read local queue");
                false
            }
        };

        let mut entry_id = None;
        if (is_human && persist) || queued {
            let entry = PendingEntry::new(
                self.inner.document_id.clone(),
                sequence,
                snapshot.clone(),
                is_human,
            )
            .with_acting_user(author.as_ref().and_then(|author| author.user_id.clone()));
            let id = entry.id.clone();
            match self.inner.queue.put(entry) {
                Ok(()) => entry_id = Some(id),
                Err(err) => warn!(
                    document_id = %self.inner.document_id,
                    sequence,
                    error = %err,
                    "could not persist change locally"
                ),
            }
        }

        PendingSave {
            snapshot,
            sequence,
            entry_id,
            author,
            is_human,
        }
    }
}
