use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// An owned, explicitly armed deadline.
///
/// `Timer` never spawns anything. The owning task polls `fired()` in its
/// select loop, so dropping the owner drops every timer with it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer `after` from now.
    pub fn arm(&mut self, after: Duration) -> Instant {
        self.arm_at(Instant::now() + after)
    }

    pub fn arm_at(&mut self, deadline: Instant) -> Instant {
        self.deadline = Some(deadline);
        deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes at the deadline; pending forever while disarmed.
    ///
    /// The returned future does not borrow the timer, so re-arming while it
    /// is outstanding takes effect the next time `fired()` is called.
    pub fn fired(&self) -> impl Future<Output = ()> + Send + 'static {
        expire(self.deadline)
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
