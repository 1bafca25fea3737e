//! Cooperative cancellation for a download run.
//!
//! A [`RunCancellation`] is shared by every unit of a run. The first caller of
//! [`RunCancellation::cancel`] records why the run stopped (a fatal transfer
//! failure or Ctrl+C); workers poll [`RunCancellation::is_cancelled`] between
//! chunks and race their sleeps against [`RunCancellation::cancelled`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Shared handle to a run's cancellation signal.
pub type SharedCancellation = Arc<RunCancellation>;

/// Why a run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The user pressed Ctrl+C.
    Interrupted,
    /// A unit failed in a way that dooms the whole run.
    Fatal {
        /// File whose transfer failed.
        filename: String,
        /// Failure description.
        message: String,
    },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted by user"),
            Self::Fatal { filename, message } => write!(f, "{filename}: {message}"),
        }
    }
}

/// One-shot cancellation signal.
#[derive(Debug, Default)]
pub struct RunCancellation {
    cancelled: AtomicBool,
    reason: OnceLock<CancelReason>,
    notify: Notify,
}

impl RunCancellation {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new signal wrapped in [`Arc`].
    pub fn shared() -> SharedCancellation {
        Arc::new(Self::new())
    }

    /// Cancel the run. Returns `true` only for the call that actually fired
    /// the signal; later reasons are dropped.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        true
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The reason recorded by the first [`cancel`](Self::cancel) call.
    pub fn reason(&self) -> Option<&CancelReason> {
        self.reason.get()
    }

    /// Wait until the run is cancelled. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel() is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
