use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::SavePolicy;
use crate::snapshot::{
    FieldRules, DEFAULT_TRANSIENT_FIELDS, DEFAULT_WHITESPACE_INSENSITIVE_FIELDS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine configuration. Every field has a default, so an empty JSON
/// object is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub scheduler: SchedulerConfig,
    pub save: SaveConfig,
    pub queue: QueueConfig,
    pub fields: FieldsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub debounce_delay_ms: u64,
    pub interaction_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 1000,
            interaction_window_ms: 2000,
        }
    }
}

impl SchedulerConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn interaction_window(&self) -> Duration {
        Duration::from_millis(self.interaction_window_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Upper bound for exponential backoff.
    pub max_retry_delay_ms: u64,
    pub backoff: RetryBackoff,
    pub watchdog_timeout_ms: u64,
    /// How long `saved` is shown before reverting to `idle`.
    pub saved_display_ms: u64,
    pub max_snapshot_bytes: usize,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
            max_retry_delay_ms: 30_000,
            backoff: RetryBackoff::Exponential,
            watchdog_timeout_ms: 30_000,
            saved_display_ms: 3000,
            max_snapshot_bytes: 5 * 1024 * 1024,
        }
    }
}

impl SaveConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn saved_display(&self) -> Duration {
        Duration::from_millis(self.saved_display_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_age_secs: u64,
    /// Soft cap across all documents, enforced by the sweep.
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 7 * 24 * 60 * 60,
            max_entries: 500,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl QueueConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub transient: BTreeSet<String>,
    pub whitespace_insensitive: BTreeSet<String>,
    /// Save revert and agent changes (without author attribution).
    pub persist_system_changes: bool,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            transient: DEFAULT_TRANSIENT_FIELDS.iter().map(|f| f.to_string()).collect(),
            whitespace_insensitive: DEFAULT_WHITESPACE_INSENSITIVE_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            persist_system_changes: true,
        }
    }
}

impl FieldsConfig {
    pub fn rules(&self) -> FieldRules {
        FieldRules::new(self.transient.clone(), self.whitespace_insensitive.clone())
    }

    pub fn policy(&self) -> SavePolicy {
        SavePolicy::from_rules(&self.rules()).with_system_changes(self.persist_system_changes)
    }
}

impl AutosaveConfig {
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Read a JSON config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_json_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like `load`, but a missing or broken file falls back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                if path.exists() {
                    tracing::warn!("config load failed, using defaults: {err}");
                }
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply `AUTOSAVE_*` overrides read through `lookup`.
    ///
    /// Invalid values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_DEBOUNCE_MS") {
            self.scheduler.debounce_delay_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_INTERACTION_WINDOW_MS") {
            self.scheduler.interaction_window_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_MAX_RETRIES") {
            self.save.max_retries = value;
        }
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_RETRY_DELAY_MS") {
            self.save.retry_delay_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_WATCHDOG_MS") {
            self.save.watchdog_timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "AUTOSAVE_QUEUE_MAX_AGE_SECS") {
            self.queue.max_age_secs = value;
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {name}, ignoring: {err}");
            None
        }
    }
}
