//! Network readiness gate.
//!
//! The Wi-Fi task owns a [`ConnectivityStatus`] and publishes `Connected` once
//! the station has an address, or `Failed` once its retry budget is spent. The
//! update coordinator only ever reads it, through [`ReadinessGate`].

use enumset::{EnumSet, EnumSetType};
use log::debug;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Flags published by the network task. At most one is set at a time.
#[derive(EnumSetType, Debug)]
pub enum ConnectivityFlag {
    /// Station associated and an IP address acquired
    Connected,
    /// Retry budget exhausted without a usable link
    Failed,
}

/// Result of waiting for the link to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Connected,
    Failed,
    TimedOut,
}

/// Blocking view of the connectivity status used by the coordinator.
///
/// Implementations must not retry or trigger reconnection themselves.
pub trait ReadinessGate {
    /// Block up to `timeout` for the link to become `Connected` or `Failed`.
    fn await_connected(&self, timeout: Duration) -> Readiness;
}

impl<T: ReadinessGate + ?Sized> ReadinessGate for Arc<T> {
    fn await_connected(&self, timeout: Duration) -> Readiness {
        (**self).await_connected(timeout)
    }
}

/// Connectivity flags shared between the network task and its readers.
#[derive(Debug, Default)]
pub struct ConnectivityStatus {
    flags: Mutex<EnumSet<ConnectivityFlag>>,
    changed: Condvar,
}

impl ConnectivityStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a settled state, replacing whatever was set before.
    pub fn set(&self, flag: ConnectivityFlag) {
        let mut flags = self.flags.lock().unwrap();
        *flags = EnumSet::only(flag);
        drop(flags);
        debug!("Connectivity: {flag:?}");
        self.changed.notify_all();
    }

    /// Clear both flags (link lost, a new connection cycle is starting).
    pub fn clear(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.clear();
        drop(flags);
        debug!("Connectivity: cleared");
        self.changed.notify_all();
    }

    /// Snapshot of the current flags.
    pub fn flags(&self) -> EnumSet<ConnectivityFlag> {
        *self.flags.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.flags().contains(ConnectivityFlag::Connected)
    }

    fn settled(flags: EnumSet<ConnectivityFlag>) -> Option<Readiness> {
        // Connected wins if a writer ever left both set
        if flags.contains(ConnectivityFlag::Connected) {
            Some(Readiness::Connected)
        } else if flags.contains(ConnectivityFlag::Failed) {
            Some(Readiness::Failed)
        } else {
            None
        }
    }
}

impl ReadinessGate for ConnectivityStatus {
    fn await_connected(&self, timeout: Duration) -> Readiness {
        // A timeout too large to form a deadline waits until the flags settle
        let deadline = Instant::now().checked_add(timeout);
        let mut flags = self.flags.lock().unwrap();

        loop {
            if let Some(readiness) = Self::settled(*flags) {
                return readiness;
            }
            let Some(deadline) = deadline else {
                flags = self.changed.wait(flags).unwrap();
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut;
            }
            let (guard, _) = self.changed.wait_timeout(flags, deadline - now).unwrap();
            flags = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_already_connected_returns_immediately() {
        let status = ConnectivityStatus::new();
        status.set(ConnectivityFlag::Connected);

        let start = Instant::now();
        assert_eq!(status.await_connected(Duration::from_secs(5)), Readiness::Connected);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_failed_is_reported() {
        let status = ConnectivityStatus::new();
        status.set(ConnectivityFlag::Failed);
        assert_eq!(status.await_connected(Duration::from_millis(10)), Readiness::Failed);
        assert!(!status.is_connected());
    }

    #[test]
    fn test_times_out_when_unsettled() {
        let status = ConnectivityStatus::new();
        let start = Instant::now();
        assert_eq!(status.await_connected(Duration::from_millis(40)), Readiness::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wakes_when_network_task_connects() {
        let status = Arc::new(ConnectivityStatus::new());
        let writer = status.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(ConnectivityFlag::Connected);
        });

        assert_eq!(status.await_connected(Duration::from_secs(2)), Readiness::Connected);
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_timeout_returns_settled_state() {
        let status = ConnectivityStatus::new();
        status.set(ConnectivityFlag::Connected);
        assert_eq!(status.await_connected(Duration::MAX), Readiness::Connected);

        status.set(ConnectivityFlag::Failed);
        assert_eq!(status.await_connected(Duration::MAX), Readiness::Failed);
    }

    #[test]
    fn test_unbounded_timeout_waits_for_network_task() {
        let status = Arc::new(ConnectivityStatus::new());
        let writer = status.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(ConnectivityFlag::Connected);
        });

        assert_eq!(status.await_connected(Duration::MAX), Readiness::Connected);
        handle.join().unwrap();
    }

    #[test]
    fn test_set_replaces_previous_flag() {
        let status = ConnectivityStatus::new();
        status.set(ConnectivityFlag::Failed);
        status.set(ConnectivityFlag::Connected);
        assert_eq!(status.flags(), EnumSet::only(ConnectivityFlag::Connected));

        status.clear();
        assert!(status.flags().is_empty());
        assert_eq!(status.await_connected(Duration::from_millis(5)), Readiness::TimedOut);
    }
}
