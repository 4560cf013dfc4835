//! Background retention sweep for the local queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::local::{LocalQueue, SweepReport};

/// Totals accumulated by a sweeper over its lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub sweeps: usize,
    pub expired: usize,
    pub evicted: usize,
    pub discarded: usize,
    pub failed: usize,
}

impl SweepStats {
    fn absorb(&mut self, report: SweepReport) {
        self.sweeps += 1;
        self.expired += report.expired;
        self.evicted += report.evicted;
        self.discarded += report.discarded;
        self.failed += report.failed;
    }
}

/// A background task that periodically purges expired queue entries.
///
/// ## Example
///
/// ```ignore
/// let sweeper = QueueSweeper::spawn(queue.clone(), Duration::from_secs(3600));
///
/// // ... run the application ...
///
/// let stats = sweeper.stop().await;
/// println!("expired {} entries", stats.expired);
/// ```
pub struct QueueSweeper {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<SweepStats>>,
}

impl QueueSweeper {
    /// Spawn the sweep loop on the current tokio runtime. The first sweep
    /// runs immediately.
    pub fn spawn(queue: Arc<LocalQueue>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut stats = SweepStats::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        stats.absorb(queue.sweep_expired());
                    }
                }
            }

            debug!(sweeps = stats.sweeps, "queue sweeper stopped");
            stats
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the sweeper to stop and wait for it. Returns its statistics.
    pub async fn stop(mut self) -> SweepStats {
        self.signal_stop();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => SweepStats::default(),
        }
    }

    /// Signal the sweeper to stop without waiting.
    pub fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for QueueSweeper {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
