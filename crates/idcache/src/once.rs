//! One-time initialization guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Runs a block at most once per process lifetime.
///
/// Concurrent callers block until the first run finishes, so no caller
/// observes a half-initialized state. A run that panics does not count;
/// the next caller runs the block again.
///
/// ```
/// use idcache::once::OneTimeRunner;
///
/// static INIT: OneTimeRunner = OneTimeRunner::new();
///
/// assert!(INIT.run(|| { /* install global state */ }));
/// assert!(!INIT.run(|| unreachable!()));
/// ```
pub struct OneTimeRunner {
    done: AtomicBool,
    lock: Mutex<()>,
}

impl OneTimeRunner {
    /// Create a runner that has not run yet.
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    /// Run `f` if no previous call has completed it.
    ///
    /// Returns `true` if this call executed `f`.
    pub fn run<F: FnOnce()>(&self, f: F) -> bool {
        if self.done.load(Ordering::Acquire) {
            return false;
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.done.load(Ordering::Acquire) {
            return false;
        }

        f();
        self.done.store(true, Ordering::Release);
        true
    }

    /// Returns `true` once the block has completed.
    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for OneTimeRunner {
    fn default() -> Self {
        Self::new()
    }
}
