//! Network reachability as a queryable flag plus a change stream.

use std::sync::Arc;
use tokio::sync::watch;

/// Reachability state shared by the engine.
///
/// The platform layer (or the CLI's health probe) feeds it through
/// [`Connectivity::set_online`]. Subscribers are only woken on transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates reachability. Returns true when the value changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Stream of `false -> true` transitions.
    pub fn reconnections(&self) -> Reconnections {
        let rx = self.subscribe();
        let last = *rx.borrow();
        Reconnections { rx, last }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Yields once per reconnection.
#[derive(Debug)]
pub struct Reconnections {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl Reconnections {
    /// Waits for the next `false -> true` edge. Returns `None` once the
    /// connectivity handle is gone.
    pub async fn next(&mut self) -> Option<()> {
        loop {
            self.rx.changed().await.ok()?;
            let now = *self.rx.borrow_and_update();
            let was = std::mem::replace(&mut self.last, now);
            if !was && now {
                return Some(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_online_reports_changes_only() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.is_online());
        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_reconnections_fire_on_rising_edge() {
        let connectivity = Connectivity::new(false);
        let mut edges = connectivity.reconnections();

        connectivity.set_online(true);
        let fired = tokio::time::timeout(Duration::from_secs(1), edges.next()).await;
        assert_eq!(fired.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn test_going_offline_is_not_a_reconnection() {
        let connectivity = Connectivity::new(true);
        let mut edges = connectivity.reconnections();

        connectivity.set_online(false);
        let fired = tokio::time::timeout(Duration::from_millis(50), edges.next()).await;
        assert!(fired.is_err());

        connectivity.set_online(true);
        let fired = tokio::time::timeout(Duration::from_secs(1), edges.next()).await;
        assert_eq!(fired.unwrap(), Some(()));
    }
}
