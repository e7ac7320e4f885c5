use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tokio::sync::Notify;

/// Process-wide error flag shared by every poller and the protocol server.
///
/// The flag is monotonic: once raised it stays raised for the rest of the
/// run, and only the first reason is kept. Loops check it between
/// operations and sleepers can wait on [`FaultFlag::raised`].
#[derive(Debug, Default)]
pub struct FaultFlag {
    raised: AtomicBool,
    reason: OnceLock<String>,
    notify: Notify,
}

impl FaultFlag {
    /// Creates a cleared flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Returns `true` if this call was the first to do so.
    pub fn raise(&self, reason: impl Into<String>) -> bool {
        let first = self.reason.set(reason.into()).is_ok();
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        first
    }

    /// Returns whether any component has raised the flag
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Reason given by the first component that raised the flag
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Completes once the flag is raised
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
