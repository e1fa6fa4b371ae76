//! Process-wide cooperative shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared "running" flag checked between accept and relay iterations.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Clone, Debug)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    /// Create a signal in the running state.
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Clear the running flag and wake anything parked in [`Shutdown::notified`].
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether loops should keep going.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered.
    pub async fn notified(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not lost.
        notified.as_mut().enable();
        if !self.is_running() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
