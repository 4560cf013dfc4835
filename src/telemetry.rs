//! Tracing subscriber setup for binaries and tests embedding the engine.
//!
//! The library itself only emits `tracing` events; nothing here runs unless
//! the host application calls [`init`].

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "AUTOSAVE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Build the filter from `AUTOSAVE_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install a global fmt subscriber. Returns false if one was already set.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init()
        .is_ok()
}
