use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A cooperative, one-shot stop flag shared between threads.
///
/// Cloning yields another handle to the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Block up to `timeout` for the flag. Returns `true` if it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}
