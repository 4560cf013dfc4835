use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SaveConfig;
use crate::error::SaveError;
use crate::queue::{BaselineCache, LocalQueue, PendingEntry};
use crate::remote::{AuthorInfo, DocumentStore, RevisionStore};
use crate::scheduler::{Debouncer, Timer};
use crate::snapshot::{Baseline, DocumentId, FieldRules, Snapshot};

use super::attempt::{SaveAttempt, SaveReceipt};
use super::state::{FailureAction, RetryPolicy, SaveMachine, SaveState};

/// Unconfirmed writes remembered for conflict detection.
const MAX_UNCONFIRMED: usize = 8;

/// A snapshot waiting to be saved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingSave {
    pub snapshot: Snapshot,
    pub sequence: u64,
    /// Id of the local queue entry carrying this snapshot, if any.
    pub entry_id: Option<String>,
    pub author: Option<AuthorInfo>,
    pub is_human: bool,
}

impl PendingSave {
    pub fn from_entry(entry: PendingEntry) -> Self {
        Self {
            author: entry
                .is_human_change
                .then(|| AuthorInfo::new(entry.acting_user_id.clone())),
            is_human: entry.is_human_change,
            sequence: entry.sequence,
            entry_id: Some(entry.id),
            snapshot: entry.snapshot,
        }
    }
}

pub(crate) enum Command {
    /// A persistable change; re-arms the debounce timer.
    Change(PendingSave),
    /// A change that matches the baseline. Only matters if it supersedes
    /// pending or in-flight work.
    Settle(PendingSave),
    /// Initial load: replace the baseline without saving.
    Seed(Baseline),
    ForceSave {
        save: PendingSave,
        reply: oneshot::Sender<bool>,
    },
    Retry,
    ClearUnsaved,
    Reject(SaveError),
    /// Adopt the remote document as the baseline, dropping local work.
    Reload(Baseline),
    Shutdown,
}

pub(crate) struct Completion {
    attempt: u64,
    save: PendingSave,
    result: Result<SaveReceipt, SaveError>,
}

struct InFlight {
    attempt: u64,
    save: PendingSave,
    started: Instant,
}

/// Collaborators and settings a saver is built from.
pub(crate) struct SaverParts {
    pub document_id: DocumentId,
    pub documents: Arc<dyn DocumentStore>,
    pub revisions: Arc<dyn RevisionStore>,
    pub queue: Arc<LocalQueue>,
    pub baselines: BaselineCache,
    pub rules: FieldRules,
    pub debouncer: Debouncer,
    pub save_config: SaveConfig,
    pub online: bool,
    pub baseline_tx: watch::Sender<Arc<Baseline>>,
    pub state_tx: watch::Sender<SaveState>,
}

/// The single owner of one document's save pipeline.
///
/// Runs as one tokio task. The baseline, the latest pending snapshot, every
/// timer and the state machine live here and are touched by nothing else;
/// handles talk to it over a command channel.
pub(crate) struct DocumentSaver {
    document_id: DocumentId,
    documents: Arc<dyn DocumentStore>,
    revisions: Arc<dyn RevisionStore>,
    queue: Arc<LocalQueue>,
    baselines: BaselineCache,
    rules: FieldRules,
    save_config: SaveConfig,

    baseline: Baseline,
    confirmed_sequence: u64,
    baseline_tx: watch::Sender<Arc<Baseline>>,
    state_tx: watch::Sender<SaveState>,
    machine: SaveMachine,

    debouncer: Debouncer,
    retry: Timer,
    watchdog: Timer,
    saved_display: Timer,

    latest: Option<PendingSave>,
    in_flight: Option<InFlight>,
    abandoned: HashSet<u64>,
    next_attempt: u64,
    unconfirmed: Vec<Snapshot>,
    force_waiters: Vec<(u64, oneshot::Sender<bool>)>,
    completions_tx: mpsc::UnboundedSender<Completion>,
}

impl DocumentSaver {
    pub fn new(parts: SaverParts) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let baseline = (**parts.baseline_tx.borrow()).clone();
        let machine = SaveMachine::new(parts.online, RetryPolicy::from_config(&parts.save_config));
        let mut saver = Self {
            document_id: parts.document_id,
            documents: parts.documents,
            revisions: parts.revisions,
            queue: parts.queue,
            baselines: parts.baselines,
            rules: parts.rules,
            save_config: parts.save_config,
            baseline,
            confirmed_sequence: 0,
            baseline_tx: parts.baseline_tx,
            state_tx: parts.state_tx,
            machine,
            debouncer: parts.debouncer,
            retry: Timer::new(),
            watchdog: Timer::new(),
            saved_display: Timer::new(),
            latest: None,
            in_flight: None,
            abandoned: HashSet::new(),
            next_attempt: 1,
            unconfirmed: Vec::new(),
            force_waiters: Vec::new(),
            completions_tx,
        };
        // Synchronous, so a change recorded right after opening is not
        // mistaken for one left over from a previous run.
        saver.restore_from_queue();
        (saver, completions_rx)
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut online: watch::Receiver<bool>,
    ) {
        if self.latest.is_some() {
            info!(document_id = %self.document_id, "resuming unsaved change from local queue");
            self.start_save();
        }
        self.publish();

        let mut online_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
                changed = online.changed(), if online_open => match changed {
                    Ok(()) => {
                        let now_online = *online.borrow_and_update();
                        self.on_connectivity(now_online);
                    }
                    Err(_) => online_open = false,
                },
                _ = self.debouncer.timer().fired() => self.on_debounce(),
                _ = self.retry.fired() => {
                    self.retry.cancel();
                    self.start_save();
                }
                _ = self.watchdog.fired() => self.on_watchdog(),
                _ = self.saved_display.fired() => {
                    self.saved_display.cancel();
                    self.machine.saved_display_elapsed();
                }
            }
            self.publish();
        }

        debug!(document_id = %self.document_id, "document saver stopped");
    }

    fn publish(&self) {
        let next = self.machine.state().clone();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn restore_from_queue(&mut self) {
        if self.latest.is_some() {
            return;
        }
        match self.queue.latest(&self.document_id) {
            Ok(Some(entry)) if entry.sequence > self.confirmed_sequence => {
                let save = PendingSave::from_entry(entry);
                self.machine.restored(save.is_human);
                self.latest = Some(save);
            }
            Ok(_) => {}
            Err(err) => warn!(
                document_id = %self.document_id,
                error = %err,
                "could not read local queue"
            ),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Change(save) => self.accept_change(save),
            Command::Settle(save) => {
                if self.latest.is_some() || self.in_flight.is_some() {
                    self.accept_change(save);
                }
            }
            Command::Seed(baseline) => {
                debug!(document_id = %self.document_id, "baseline seeded by initial load");
                self.replace_baseline(baseline);
            }
            Command::ForceSave { save, reply } => self.force_save(save, reply),
            Command::Retry => {
                if self.in_flight.is_some() {
                    return;
                }
                self.restore_from_queue();
                self.start_save();
            }
            Command::ClearUnsaved => {
                self.latest = None;
                self.debouncer.cancel();
                self.retry.cancel();
                self.machine.discarded_pending();
            }
            Command::Reject(err) => {
                warn!(document_id = %self.document_id, error = %err, "change rejected");
                self.machine.rejected(err);
            }
            Command::Reload(baseline) => {
                info!(document_id = %self.document_id, "baseline reloaded from document store");
                self.latest = None;
                self.debouncer.cancel();
                self.retry.cancel();
                self.unconfirmed.clear();
                self.replace_baseline(baseline);
                self.machine.baseline_reloaded();
            }
            Command::Shutdown => {}
        }
    }

    fn accept_change(&mut self, save: PendingSave) {
        if save.sequence <= self.confirmed_sequence {
            return;
        }
        self.machine.edit_arrived(save.is_human);
        let deadline = self.debouncer.schedule(Instant::now(), save.is_human);
        debug!(
            document_id = %self.document_id,
            sequence = save.sequence,
            in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "save scheduled"
        );
        self.latest = Some(save);
    }

    fn force_save(&mut self, save: PendingSave, reply: oneshot::Sender<bool>) {
        if save.sequence > self.confirmed_sequence {
            let unchanged = self.rules.identical(&save.snapshot, &self.baseline.snapshot);
            self.machine.edit_arrived(save.is_human && !unchanged);
            self.latest = Some(save);
        }
        let target = self
            .latest
            .as_ref()
            .map(|save| save.sequence)
            .or_else(|| self.in_flight.as_ref().map(|flight| flight.save.sequence));

        let Some(target) = target else {
            let _ = reply.send(true);
            return;
        };
        self.force_waiters.push((target, reply));
        self.debouncer.cancel();
        self.start_save();

        // A no-op resolves above even offline; anything needing the network fails fast.
        if !self.machine.is_online() {
            if let Some(index) = self.force_waiters.iter().position(|(t, _)| *t == target) {
                self.publish();
                let (_, reply) = self.force_waiters.remove(index);
                let _ = reply.send(false);
            }
        }
    }

    fn replace_baseline(&mut self, baseline: Baseline) {
        if let Err(err) = self.baselines.store(&self.document_id, &baseline) {
            warn!(document_id = %self.document_id, error = %err, "could not cache baseline");
        }
        self.baseline = baseline.clone();
        self.baseline_tx.send_replace(Arc::new(baseline));
    }

    // ========================================================================
    // Timers and connectivity
    // ========================================================================

    fn on_debounce(&mut self) {
        self.debouncer.cancel();
        if self.in_flight.is_some() {
            // The follow-up starts when the attempt completes.
            return;
        }
        self.start_save();
    }

    fn on_watchdog(&mut self) {
        self.watchdog.cancel();
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let timeout = self.save_config.watchdog_timeout();
        warn!(
            document_id = %self.document_id,
            attempt = flight.attempt,
            elapsed_ms = flight.started.elapsed().as_millis() as u64,
            "save exceeded watchdog timeout, abandoning attempt"
        );
        self.abandoned.insert(flight.attempt);
        self.remember_unconfirmed(flight.save.snapshot.clone());
        if self.latest.is_none() {
            self.latest = Some(flight.save);
        }
        self.machine.watchdog_expired(timeout);
        self.resolve_all(false);
    }

    fn on_connectivity(&mut self, online: bool) {
        if online {
            self.machine.came_online();
            self.restore_from_queue();
            if self.latest.is_some() {
                info!(document_id = %self.document_id, "back online, saving pending change");
                self.start_save();
            }
        } else {
            self.machine.went_offline();
            self.retry.cancel();
        }
    }

    // ========================================================================
    // Attempts
    // ========================================================================

    fn start_save(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(save) = self.latest.take() else {
            return;
        };

        if self.rules.identical(&save.snapshot, &self.baseline.snapshot) {
            self.debouncer.cancel();
            self.retry.cancel();
            debug!(
                document_id = %self.document_id,
                sequence = save.sequence,
                "snapshot matches baseline, skipping save"
            );
            self.confirmed_sequence = self.confirmed_sequence.max(save.sequence);
            self.remove_entry(&save);
            self.machine.skipped_noop();
            self.resolve_through(save.sequence, true);
            return;
        }

        if !self.machine.is_online() {
            self.latest = Some(save);
            return;
        }
        self.debouncer.cancel();
        self.retry.cancel();

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.machine.begin_save();
        self.saved_display.cancel();
        self.watchdog.arm(self.save_config.watchdog_timeout());

        debug!(
            document_id = %self.document_id,
            attempt,
            sequence = save.sequence,
            retry_count = self.machine.state().retry_count,
            "save started"
        );

        let work = SaveAttempt {
            documents: Arc::clone(&self.documents),
            revisions: Arc::clone(&self.revisions),
            document_id: self.document_id.clone(),
            baseline: self.baseline.clone(),
            snapshot: save.snapshot.clone(),
            author: save.author.clone(),
            unconfirmed: self.unconfirmed.clone(),
        };
        let completions = self.completions_tx.clone();
        let carried = save.clone();
        tokio::spawn(async move {
            let result = work.run().await;
            let _ = completions.send(Completion {
                attempt,
                save: carried,
                result,
            });
        });

        self.in_flight = Some(InFlight {
            attempt,
            save,
            started: Instant::now(),
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.attempt == completion.attempt);

        if current {
            self.in_flight = None;
            self.watchdog.cancel();
            match completion.result {
                Ok(receipt) => self.on_success(completion.save, receipt),
                Err(err) => self.on_failure(completion.save, err),
            }
            return;
        }

        if !self.abandoned.remove(&completion.attempt) {
            return;
        }
        match completion.result {
            Ok(receipt) if completion.save.sequence > self.confirmed_sequence => {
                info!(
                    document_id = %self.document_id,
                    attempt = completion.attempt,
                    "abandoned save finished late, adopting its result"
                );
                self.confirm(&completion.save, &receipt);
                let still_unsaved = self.latest.as_ref().is_some_and(|save| save.is_human);
                self.machine
                    .adopted_late_success(SystemTime::now(), still_unsaved);
            }
            Ok(_) => {}
            Err(err) => debug!(
                document_id = %self.document_id,
                attempt = completion.attempt,
                error = %err,
                "abandoned save failed late, ignoring"
            ),
        }
    }

    fn on_success(&mut self, save: PendingSave, receipt: SaveReceipt) {
        info!(
            document_id = %self.document_id,
            sequence = save.sequence,
            revision = receipt.revision.as_ref().map(|rev| rev.version),
            "document saved"
        );
        self.confirm(&save, &receipt);
        let still_unsaved = self.latest.as_ref().is_some_and(|save| save.is_human);
        self.machine.save_succeeded(SystemTime::now(), still_unsaved);
        self.saved_display.arm(self.save_config.saved_display());
        self.resolve_through(save.sequence, true);

        if self.latest.is_some() && !self.debouncer.is_armed() {
            self.start_save();
        }
    }

    /// Make `save` the confirmed baseline.
    fn confirm(&mut self, save: &PendingSave, receipt: &SaveReceipt) {
        self.confirmed_sequence = save.sequence;
        self.unconfirmed.clear();
        self.replace_baseline(Baseline::new(save.snapshot.clone(), Some(receipt.updated_at)));
        self.remove_entry(save);
        if self
            .latest
            .as_ref()
            .is_some_and(|latest| latest.sequence <= save.sequence)
        {
            self.latest = None;
        }
    }

    fn on_failure(&mut self, save: PendingSave, err: SaveError) {
        warn!(
            document_id = %self.document_id,
            sequence = save.sequence,
            error = %err,
            "save failed"
        );
        self.remember_unconfirmed(save.snapshot.clone());
        let sequence = save.sequence;
        if self.latest.is_none() {
            self.latest = Some(save);
        }

        match self.machine.save_failed(err) {
            FailureAction::Retry(delay) => {
                debug!(
                    document_id = %self.document_id,
                    retry_count = self.machine.state().retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                self.retry.arm(delay);
                self.resolve_through(sequence, false);
            }
            FailureAction::GiveUp | FailureAction::HoldOffline => self.resolve_all(false),
        }
    }

    fn remember_unconfirmed(&mut self, snapshot: Snapshot) {
        if self.unconfirmed.contains(&snapshot) {
            return;
        }
        if self.unconfirmed.len() == MAX_UNCONFIRMED {
            self.unconfirmed.remove(0);
        }
        self.unconfirmed.push(snapshot);
    }

    fn remove_entry(&self, save: &PendingSave) {
        let Some(entry_id) = &save.entry_id else {
            return;
        };
        if let Err(err) = self.queue.remove(&self.document_id, entry_id) {
            warn!(
                document_id = %self.document_id,
                entry_id = %entry_id,
                error = %err,
                "could not remove confirmed entry from local queue"
            );
        }
    }

    fn resolve_through(&mut self, sequence: u64, outcome: bool) {
        self.publish();
        let mut waiting = Vec::with_capacity(self.force_waiters.len());
        for (target, reply) in self.force_waiters.drain(..) {
            if target <= sequence {
                let _ = reply.send(outcome);
            } else {
                waiting.push((target, reply));
            }
        }
        self.force_waiters = waiting;
    }

    fn resolve_all(&mut self, outcome: bool) {
        self.publish();
        for (_, reply) in self.force_waiters.drain(..) {
            let _ = reply.send(outcome);
        }
    }
}

