use std::time::Duration;

use tokio::time::Instant;

use crate::config::SchedulerConfig;

use super::timer::Timer;

/// Coalesces bursts of edits into one save.
///
/// Every call re-arms the timer. While the user is actively interacting (a
/// human call within the last `interaction_window`), the delay is extended
/// by the window so a save never fires mid-burst.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    window: Duration,
    last_interaction: Option<Instant>,
    timer: Timer,
}

impl Debouncer {
    pub fn new(delay: Duration, window: Duration) -> Self {
        Self {
            delay,
            window,
            last_interaction: None,
            timer: Timer::new(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.debounce_delay(), config.interaction_window())
    }

    /// Re-arm for an edit arriving at `now`. Returns the new deadline.
    ///
    /// Only human calls refresh the interaction clock.
    pub fn schedule(&mut self, now: Instant, is_human: bool) -> Instant {
        let delay = if self.is_interacting(now) {
            self.delay + self.window
        } else {
            self.delay
        };
        if is_human {
            self.last_interaction = Some(now);
        }
        self.timer.arm_at(now + delay)
    }

    pub fn is_interacting(&self, now: Instant) -> bool {
        self.last_interaction
            .is_some_and(|at| now.saturating_duration_since(at) < self.window)
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }
}
