use std::sync::Arc;

use tracing::warn;

use crate::error::StorageError;
use crate::snapshot::{Baseline, DocumentId};
use crate::storage::KvStore;

use super::local::escape_segment;

const BASELINE_PREFIX: &str = "baseline/";

/// Local copy of each document's confirmed baseline.
///
/// Lets a process that restarts while offline diff queued changes against
/// the last baseline it confirmed.
#[derive(Clone)]
pub struct BaselineCache {
    store: Arc<dyn KvStore>,
}

impl BaselineCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Unreadable or corrupt cache entries are treated as missing.
    pub fn load(&self, document_id: &DocumentId) -> Option<Baseline> {
        let key = baseline_key(document_id);
        let bytes = match self.store.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "could not read cached baseline");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(baseline) => Some(baseline),
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "discarding corrupt cached baseline");
                let _ = self.store.remove(&key);
                None
            }
        }
    }

    pub fn store(&self, document_id: &DocumentId, baseline: &Baseline) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(baseline)?;
        self.store.set(&baseline_key(document_id), &bytes)
    }

    pub fn clear(&self, document_id: &DocumentId) -> Result<bool, StorageError> {
        self.store.remove(&baseline_key(document_id))
    }
}

fn baseline_key(document_id: &DocumentId) -> String {
    format!("{}{}", BASELINE_PREFIX, escape_segment(document_id.as_str()))
}
