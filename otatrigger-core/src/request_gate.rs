//! Single-slot update request signal.
//!
//! The button task calls [`RequestGate::signal`] on every debounced press; the
//! coordinator blocks in [`RequestGate::wait_and_clear`]. The gate holds a
//! presence flag, not a counter, so any number of presses that arrive before the
//! coordinator clears it collapse into one pending request.

use derive_more::{Display, Error};
use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Errors from the process-wide gate handle.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    /// [`init_global`] has not run yet
    #[display("update request gate used before initialisation")]
    Uninitialized,
    /// [`init_global`] was called a second time
    #[display("update request gate already initialised")]
    AlreadyInitialized,
}

/// Binary "update requested" flag with a blocking consumer side.
#[derive(Debug, Default)]
pub struct RequestGate {
    pending: Mutex<bool>,
    wake: Condvar,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an update as requested.
    ///
    /// Setting an already pending request is a no-op, so bursts of presses
    /// never queue more than one attempt.
    ///
    /// Returns `true` if this call raised the flag, `false` if it was coalesced
    /// into a request that was already pending.
    pub fn signal(&self) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let raised = !*pending;
        *pending = true;
        drop(pending);

        if raised {
            debug!("Update request raised");
        } else {
            debug!("Update request already pending, coalesced");
        }
        self.wake.notify_one();
        raised
    }

    /// Whether a request is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap()
    }

    /// Block until a request is pending, then clear it.
    ///
    /// With `Some(timeout)` the wait gives up after `timeout` and returns
    /// `false` ("no request"); with `None` it waits indefinitely. Returns `true`
    /// when a request was consumed.
    pub fn wait_and_clear(&self, timeout: Option<Duration>) -> bool {
        // A timeout too large to form a deadline waits indefinitely
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut pending = self.pending.lock().unwrap();

        match deadline {
            None => {
                while !*pending {
                    pending = self.wake.wait(pending).unwrap();
                }
            }
            Some(deadline) => {
                while !*pending {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self.wake.wait_timeout(pending, deadline - now).unwrap();
                    pending = guard;
                }
            }
        }

        *pending = false;
        true
    }
}

static GLOBAL_GATE: OnceLock<Arc<RequestGate>> = OnceLock::new();

/// Create the process-wide request gate.
///
/// Must run exactly once during startup, before any trigger source is started.
pub fn init_global() -> Result<Arc<RequestGate>, GateError> {
    let gate = Arc::new(RequestGate::new());
    GLOBAL_GATE
        .set(gate.clone())
        .map_err(|_| GateError::AlreadyInitialized)?;
    info!("Update request gate initialised");
    Ok(gate)
}

/// Handle to the process-wide gate created by [`init_global`].
pub fn global() -> Result<Arc<RequestGate>, GateError> {
    GLOBAL_GATE.get().cloned().ok_or(GateError::Uninitialized)
}

/// Signal the process-wide gate.
///
/// Fails with [`GateError::Uninitialized`] when called before [`init_global`],
/// which happens if the update feature failed to start on this boot.
pub fn signal_global() -> Result<bool, GateError> {
    GLOBAL_GATE
        .get()
        .map(|gate| gate.signal())
        .ok_or(GateError::Uninitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_then_wait_consumes() {
        let gate = RequestGate::new();
        assert!(gate.signal());
        assert!(gate.is_pending());
        assert!(gate.wait_and_clear(Some(Duration::from_millis(10))));
        assert!(!gate.is_pending());
    }

    #[test]
    fn test_repeated_signals_coalesce() {
        let gate = RequestGate::new();
        assert!(gate.signal());
        for _ in 0..5 {
            assert!(!gate.signal());
        }

        // Exactly one request comes out the other end
        assert!(gate.wait_and_clear(Some(Duration::from_millis(10))));
        assert!(!gate.wait_and_clear(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let gate = RequestGate::new();
        let start = Instant::now();
        assert!(!gate.wait_and_clear(Some(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_wakes_on_signal_from_other_thread() {
        let gate = Arc::new(RequestGate::new());
        let producer = gate.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal();
        });

        assert!(gate.wait_and_clear(None));
        handle.join().unwrap();
        assert!(!gate.is_pending());
    }

    #[test]
    fn test_signal_after_clear_is_not_lost() {
        let gate = RequestGate::new();
        gate.signal();
        assert!(gate.wait_and_clear(None));

        // A press arriving after the coordinator cleared the flag is a new request
        assert!(gate.signal());
        assert!(gate.wait_and_clear(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_unbounded_timeout_consumes_pending_request() {
        let gate = RequestGate::new();
        gate.signal();
        assert!(gate.wait_and_clear(Some(Duration::MAX)));
        assert!(!gate.is_pending());
    }

    #[test]
    fn test_unbounded_timeout_waits_for_signal() {
        let gate = Arc::new(RequestGate::new());
        let producer = gate.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal();
        });

        assert!(gate.wait_and_clear(Some(Duration::MAX)));
        handle.join().unwrap();
    }

    #[test]
    fn test_global_gate_lifecycle() {
        // The only test touching the process-wide handle
        assert_eq!(global().err(), Some(GateError::Uninitialized));
        assert_eq!(signal_global(), Err(GateError::Uninitialized));

        let gate = init_global().unwrap();
        assert_eq!(init_global().err(), Some(GateError::AlreadyInitialized));

        assert_eq!(signal_global(), Ok(true));
        assert_eq!(signal_global(), Ok(false));
        assert!(global().unwrap().is_pending());
        assert!(gate.wait_and_clear(Some(Duration::from_millis(10))));
    }
}
