//! One-shot signal shared between the session owner and the capture worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A flag that can be set once and waited on with a timeout.
#[derive(Debug, Default)]
pub struct Signal {
    flag: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Signal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake all waiters.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cvar.notify_all();
    }

    /// Whether the signal has been set.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Block for at most `timeout`, returning early once the signal is set.
    /// Returns whether the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.lock.lock();
        if self.is_set() {
            return true;
        }
        self.cvar.wait_for(&mut guard, timeout);
        self.is_set()
    }
}
