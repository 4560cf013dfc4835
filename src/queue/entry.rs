use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::snapshot::{DocumentId, Snapshot};

/// A change that was recorded locally but not yet confirmed remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: String,
    pub document_id: DocumentId,
    pub snapshot: Snapshot,
    /// Milliseconds since the Unix epoch at which the change was recorded.
    pub timestamp: u64,
    pub is_human_change: bool,
    pub sequence: u64,
    /// Author of a human change, restored as revision attribution on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting_user_id: Option<String>,
}

impl PendingEntry {
    pub fn new(
        document_id: DocumentId,
        sequence: u64,
        snapshot: Snapshot,
        is_human_change: bool,
    ) -> Self {
        Self::recorded_at(document_id, sequence, snapshot, is_human_change, SystemTime::now())
    }

    pub fn recorded_at(
        document_id: DocumentId,
        sequence: u64,
        snapshot: Snapshot,
        is_human_change: bool,
        at: SystemTime,
    ) -> Self {
        Self {
            id: format!("{}:{}", document_id, sequence),
            document_id,
            snapshot,
            timestamp: unix_millis(at),
            is_human_change,
            sequence,
            acting_user_id: None,
        }
    }

    pub fn with_acting_user(mut self, user_id: Option<String>) -> Self {
        self.acting_user_id = user_id;
        self
    }

    pub fn recorded(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.timestamp)
    }

    /// Age relative to `now`; zero if the clock moved backwards.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.recorded()).unwrap_or_default()
    }
}

pub(crate) fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
