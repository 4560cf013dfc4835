use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::config::{RetryBackoff, SaveConfig};
use crate::error::SaveError;

/// Observable save status of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
    Offline,
}

/// Snapshot of the save state published to observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveState {
    pub status: SaveStatus,
    pub has_unsaved_changes: bool,
    pub last_saved_at: Option<SystemTime>,
    pub last_error: Option<SaveError>,
    pub retry_count: u32,
}

impl SaveState {
    pub fn is_saving(&self) -> bool {
        self.status == SaveStatus::Saving
    }

    pub fn is_error(&self) -> bool {
        self.status == SaveStatus::Error
    }
}

/// What the driver should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Arm the retry timer.
    Retry(Duration),
    /// Stay in `error` until a new edit or a manual retry.
    GiveUp,
    /// Offline; the reconnect path will save.
    HoldOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: RetryBackoff,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SaveConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff,
            retry_delay: config.retry_delay(),
            max_retry_delay: config.max_retry_delay(),
        }
    }

    /// Delay before retry number `retry_count` (1-based).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.retry_delay,
            RetryBackoff::Exponential => {
                let exponent = retry_count.saturating_sub(1).min(16);
                self.retry_delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_retry_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SaveConfig::default())
    }
}

/// Pure save state machine.
///
/// Holds no timers and performs no I/O; the document task feeds it events
/// and acts on what it returns.
#[derive(Debug, Clone)]
pub struct SaveMachine {
    state: SaveState,
    online: bool,
    policy: RetryPolicy,
}

impl SaveMachine {
    pub fn new(online: bool, policy: RetryPolicy) -> Self {
        let state = SaveState {
            status: if online { SaveStatus::Idle } else { SaveStatus::Offline },
            ..SaveState::default()
        };
        Self {
            state,
            online,
            policy,
        }
    }

    pub fn state(&self) -> &SaveState {
        &self.state
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    fn resting(&self) -> SaveStatus {
        if self.online {
            SaveStatus::Idle
        } else {
            SaveStatus::Offline
        }
    }

    /// A new persistable edit. Resets the retry counter.
    pub fn edit_arrived(&mut self, is_human: bool) {
        self.state.retry_count = 0;
        if is_human {
            self.state.has_unsaved_changes = true;
        }
    }

    /// A pending snapshot was restored from the local queue.
    pub fn restored(&mut self, is_human: bool) {
        if is_human {
            self.state.has_unsaved_changes = true;
        }
    }

    pub fn begin_save(&mut self) {
        self.state.status = SaveStatus::Saving;
    }

    pub fn save_succeeded(&mut self, at: SystemTime, still_unsaved: bool) {
        self.state.status = if self.online {
            SaveStatus::Saved
        } else {
            SaveStatus::Offline
        };
        self.state.has_unsaved_changes = still_unsaved;
        self.state.last_saved_at = Some(at);
        self.state.last_error = None;
        self.state.retry_count = 0;
    }

    /// A late success of an abandoned attempt; the status is left alone.
    pub fn adopted_late_success(&mut self, at: SystemTime, still_unsaved: bool) {
        self.state.has_unsaved_changes = still_unsaved;
        self.state.last_saved_at = Some(at);
    }

    pub fn save_failed(&mut self, err: SaveError) -> FailureAction {
        if err.is_retryable() && !self.online {
            self.state.status = SaveStatus::Offline;
            self.state.last_error = Some(err);
            return FailureAction::HoldOffline;
        }
        if !err.is_retryable() {
            self.state.status = SaveStatus::Error;
            self.state.last_error = Some(err);
            return FailureAction::GiveUp;
        }

        self.state.retry_count += 1;
        self.state.last_error = Some(err);
        if self.state.retry_count < self.policy.max_retries {
            self.state.status = SaveStatus::Saving;
            FailureAction::Retry(self.policy.delay_for(self.state.retry_count))
        } else {
            self.state.status = SaveStatus::Error;
            FailureAction::GiveUp
        }
    }

    /// The snapshot matched the baseline; nothing was sent.
    pub fn skipped_noop(&mut self) {
        self.state.status = self.resting();
        self.state.has_unsaved_changes = false;
    }

    pub fn watchdog_expired(&mut self, after: Duration) {
        self.state.status = self.resting();
        self.state.last_error = Some(SaveError::Timeout(after));
    }

    pub fn saved_display_elapsed(&mut self) {
        if self.state.status == SaveStatus::Saved {
            self.state.status = SaveStatus::Idle;
        }
    }

    pub fn went_offline(&mut self) {
        self.online = false;
        if self.state.status != SaveStatus::Saving {
            self.state.status = SaveStatus::Offline;
        }
    }

    pub fn came_online(&mut self) {
        self.online = true;
        if self.state.status == SaveStatus::Offline {
            self.state.status = SaveStatus::Idle;
        }
    }

    /// Pending work was dropped by the caller.
    pub fn discarded_pending(&mut self) {
        self.state.has_unsaved_changes = false;
        self.state.retry_count = 0;
        if self.state.status == SaveStatus::Error {
            self.state.status = self.resting();
            self.state.last_error = None;
        }
    }

    /// A change was refused before reaching the queue.
    pub fn rejected(&mut self, err: SaveError) {
        self.state.status = SaveStatus::Error;
        self.state.last_error = Some(err);
    }

    pub fn baseline_reloaded(&mut self) {
        self.state.status = self.resting();
        self.state.has_unsaved_changes = false;
        self.state.last_error = None;
        self.state.retry_count = 0;
    }
}
