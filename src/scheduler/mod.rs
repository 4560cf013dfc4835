//! Cancellable timers and the debounce/interaction scheduler.

mod debounce;
mod timer;

pub use debounce::Debouncer;
pub use timer::Timer;
