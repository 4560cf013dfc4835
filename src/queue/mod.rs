//! Local durable queue of unconfirmed changes.
//!
//! - `LocalQueue` - latest-wins pending entries, one authoritative entry per document
//! - `BaselineCache` - last confirmed baseline per document, for offline restarts
//! - `QueueSweeper` - background retention sweep (age and soft cap)

mod baseline;
mod entry;
mod local;
mod sweeper;

pub use baseline::BaselineCache;
pub use entry::PendingEntry;
pub use local::{LocalQueue, SweepReport};
pub use sweeper::{QueueSweeper, SweepStats};
