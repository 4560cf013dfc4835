//! Save orchestration for one document.
//!
//! - `SaveMachine` - pure state transitions (idle, saving, saved, error, offline)
//! - `DocumentSaver` - the task that owns baseline, timers and in-flight attempt
//! - `DocumentHandle` - the caller-facing side, talking to the task over a channel

mod attempt;
mod handle;
mod saver;
mod state;

pub use attempt::SaveReceipt;
pub use handle::{ChangeOutcome, DocumentHandle};
pub use state::{FailureAction, RetryPolicy, SaveMachine, SaveState, SaveStatus};

pub(crate) use handle::HandleParts;
pub(crate) use saver::{DocumentSaver, SaverParts};
