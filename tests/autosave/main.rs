//! Autosave engine integration tests.
//!
//! Every test runs with paused tokio time, so debounce, retry and watchdog
//! delays elapse deterministically.

mod support;
mod pipeline;
mod offline;
mod registry;
