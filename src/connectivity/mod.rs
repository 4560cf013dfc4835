//! Online/offline signal shared by every document.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Boolean connectivity signal with observable transitions.
///
/// Clone-friendly (cloning shares the same underlying channel).
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record the current connectivity. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            if online {
                info!("connectivity restored");
            } else {
                warn!("connectivity lost, saves are held until reconnect");
            }
        }
        changed
    }

    pub fn go_offline(&self) -> bool {
        self.set_online(false)
    }

    pub fn go_online(&self) -> bool {
        self.set_online(true)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
