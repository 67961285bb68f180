//! Cancellation token shared by the long running threads of the daemon.
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Deref for Shutdown {
    type Target = ShutdownInner;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownInner {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownInner {
    // A panicking holder cannot leave the flag half written.
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request all threads to finish.
    pub fn cancel(&self) {
        let mut cancelled = self.flag();
        *cancelled = true;
        self.cv.notify_all();
    }

    /// Returns true iff shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// Wait until the duration expires or shutdown is requested.
    /// Returns true if shutdown has been requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let cancelled = self.flag();
        let (cancelled, _) = self
            .cv
            .wait_timeout_while(cancelled, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}
