//! Document snapshots, baselines, field rules and baseline diffs.

mod diff;
mod document;
mod rules;

pub use diff::BaselineDiff;
pub use document::{Baseline, DocumentId, Snapshot};
pub use rules::{FieldRules, DEFAULT_TRANSIENT_FIELDS, DEFAULT_WHITESPACE_INSENSITIVE_FIELDS};
