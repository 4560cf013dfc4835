use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::StorageError;
use crate::snapshot::DocumentId;
use crate::storage::KvStore;

use super::entry::PendingEntry;

pub(crate) const PENDING_PREFIX: &str = "pending/";

/// Outcome of one retention sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// Removed because they were older than `max_age`.
    pub expired: usize,
    /// Removed because the queue was over its soft cap.
    pub evicted: usize,
    /// Removed because they could not be decoded.
    pub discarded: usize,
    /// Storage operations that failed; the sweep carried on.
    pub failed: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted + self.discarded
    }
}

/// Durable, per-document, latest-wins queue of unconfirmed changes.
///
/// At most one entry per document is authoritative: `put` supersedes every
/// older entry of the same document instead of appending behind it.
pub struct LocalQueue {
    store: Arc<dyn KvStore>,
    config: QueueConfig,
}

impl LocalQueue {
    pub fn new(store: Arc<dyn KvStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Record `entry`, superseding older entries for its document.
    ///
    /// The new entry is written before the old ones are removed, so an
    /// interrupted `put` leaves the newest entry readable via `latest`.
    pub fn put(&self, entry: PendingEntry) -> Result<(), StorageError> {
        let key = entry_key(&entry.document_id, entry.sequence);
        let bytes = serde_json::to_vec(&entry)?;
        self.store.set(&key, &bytes)?;

        let mut superseded = 0usize;
        for old in self.store.keys_with_prefix(&document_prefix(&entry.document_id))? {
            if old != key && self.store.remove(&old)? {
                superseded += 1;
            }
        }
        debug!(
            document_id = %entry.document_id,
            entry_id = %entry.id,
            superseded,
            "pending change recorded"
        );
        Ok(())
    }

    /// The newest readable entry for `document_id`.
    pub fn latest(&self, document_id: &DocumentId) -> Result<Option<PendingEntry>, StorageError> {
        let keys = self.store.keys_with_prefix(&document_prefix(document_id))?;
        for key in keys.iter().rev() {
            if let Some(entry) = self.read_entry(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Remove the entry with `entry_id`. Returns false if it was already
    /// superseded or removed.
    pub fn remove(&self, document_id: &DocumentId, entry_id: &str) -> Result<bool, StorageError> {
        for key in self.store.keys_with_prefix(&document_prefix(document_id))? {
            if let Some(entry) = self.read_entry(&key)? {
                if entry.id == entry_id {
                    return self.store.remove(&key);
                }
            }
        }
        Ok(false)
    }

    /// Remove every entry of `document_id`. Returns how many were removed.
    pub fn clear(&self, document_id: &DocumentId) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.store.keys_with_prefix(&document_prefix(document_id))? {
            if self.store.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Readable entries of `document_id`, oldest first.
    pub fn list_all(&self, document_id: &DocumentId) -> Result<Vec<PendingEntry>, StorageError> {
        let mut entries = Vec::new();
        for key in self.store.keys_with_prefix(&document_prefix(document_id))? {
            if let Some(entry) = self.read_entry(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Documents that currently have at least one stored entry.
    pub fn documents(&self) -> Result<Vec<DocumentId>, StorageError> {
        let mut documents = BTreeSet::new();
        for key in self.store.keys_with_prefix(PENDING_PREFIX)? {
            let Some((segment, _)) = key[PENDING_PREFIX.len()..].rsplit_once('/') else {
                continue;
            };
            if let Ok(id) = DocumentId::new(unescape_segment(segment)) {
                documents.insert(id);
            }
        }
        Ok(documents.into_iter().collect())
    }

    /// Sequence number to use for the next entry of `document_id`.
    pub fn next_sequence(&self, document_id: &DocumentId) -> Result<u64, StorageError> {
        let last = self
            .store
            .keys_with_prefix(&document_prefix(document_id))?
            .iter()
            .filter_map(|key| key.rsplit_once('/'))
            .filter_map(|(_, sequence)| sequence.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    pub fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(SystemTime::now())
    }

    /// Best-effort retention sweep. Never fails; problems are logged and counted.
    pub fn sweep_expired_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let keys = match self.store.keys_with_prefix(PENDING_PREFIX) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "queue sweep could not list entries");
                report.failed += 1;
                return report;
            }
        };

        let max_age = self.config.max_age();
        let mut live = Vec::new();
        for key in keys {
            report.scanned += 1;
            let bytes = match self.store.get(&key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %key, error = %err, "queue sweep could not read entry");
                    report.failed += 1;
                    continue;
                }
            };
            match serde_json::from_slice::<PendingEntry>(&bytes) {
                Ok(entry) if entry.age_at(now) > max_age => {
                    if self.remove_quietly(&key, &mut report) {
                        report.expired += 1;
                    }
                }
                Ok(entry) => live.push((entry.timestamp, key)),
                Err(err) => {
                    warn!(key = %key, error = %err, "discarding corrupt pending entry");
                    if self.remove_quietly(&key, &mut report) {
                        report.discarded += 1;
                    }
                }
            }
        }

        if live.len() > self.config.max_entries {
            live.sort();
            let excess = live.len() - self.config.max_entries;
            for (_, key) in live.into_iter().take(excess) {
                if self.remove_quietly(&key, &mut report) {
                    report.evicted += 1;
                }
            }
        }

        if report.removed() > 0 || report.failed > 0 {
            debug!(
                scanned = report.scanned,
                expired = report.expired,
                evicted = report.evicted,
                discarded = report.discarded,
                failed = report.failed,
                "queue sweep finished"
            );
        }
        report
    }

    fn remove_quietly(&self, key: &str, report: &mut SweepReport) -> bool {
        match self.store.remove(key) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(key = %key, error = %err, "queue sweep could not remove entry");
                report.failed += 1;
                false
            }
        }
    }

    /// Decode one entry; corrupt entries are discarded, not reported.
    fn read_entry(&self, key: &str) -> Result<Option<PendingEntry>, StorageError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<PendingEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding corrupt pending entry");
                if let Err(err) = self.store.remove(key) {
                    warn!(key = %key, error = %err, "could not remove corrupt pending entry");
                }
                Ok(None)
            }
        }
    }
}

fn document_prefix(document_id: &DocumentId) -> String {
    format!("{}{}/", PENDING_PREFIX, escape_segment(document_id.as_str()))
}

fn entry_key(document_id: &DocumentId, sequence: u64) -> String {
    format!("{}{:020}", document_prefix(document_id), sequence)
}

/// Make a document id safe to use as one `/`-separated key segment.
pub(crate) fn escape_segment(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for ch in id.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("%2F", "/").replace("%25", "%")
}
