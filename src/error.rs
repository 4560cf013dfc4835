use std::time::{Duration, SystemTime};

use thiserror::Error;

/// Why a save did not reach the revision store.
///
/// Only `TransientNetwork` is retried. `Conflict` asks the user to refresh;
/// `Timeout` comes from the watchdog and waits for the next edit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error("invalid snapshot: {0}")]
    Validation(String),
    #[error("network error: {0}")]
    TransientNetwork(String),
    #[error("document {document_id} was changed remotely, refresh required")]
    Conflict {
        document_id: String,
        remote_updated_at: Option<SystemTime>,
    },
    #[error("save did not finish within {0:?}")]
    Timeout(Duration),
}

impl SaveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SaveError::TransientNetwork(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SaveError::Conflict { .. })
    }
}

/// Errors reported by the remote document and revision stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote store rejected the write for {document_id}: baseline is stale")]
    Conflict {
        document_id: String,
        remote_updated_at: Option<SystemTime>,
    },
    #[error("remote store rejected the request: {0}")]
    Rejected(String),
}

impl From<StoreError> for SaveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => SaveError::TransientNetwork(message),
            StoreError::Conflict {
                document_id,
                remote_updated_at,
            } => SaveError::Conflict {
                document_id,
                remote_updated_at,
            },
            StoreError::Rejected(message) => SaveError::Validation(message),
        }
    }
}

/// Errors from the device-local key-value storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("local storage lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("local storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("local storage encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}
