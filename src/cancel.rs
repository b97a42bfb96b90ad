//! Cooperative cancellation shared by the send and receive loops.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Granularity at which sleeping loops re-check the cancellation flag.
const SLEEP_STEP: Duration = Duration::from_millis(50);

/// A cancellation signal observed at the next suspension point.
///
/// A child token is cancelled when either itself or its parent is cancelled,
/// which lets an engine stop its own loops without cancelling the caller.
///
/// ```
/// use netprobe::cancel::Cancellation;
///
/// let parent = Cancellation::new();
/// let child = parent.child();
/// child.cancel();
/// assert!(child.is_cancelled());
/// assert!(!parent.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    stopped: Arc<AtomicBool>,
    parent: Option<Box<Cancellation>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Cancellation {
            stopped: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
            || self.parent.as_ref().map_or(false, |p| p.is_cancelled())
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns `false` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.is_cancelled() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return true;
            }
            sleep((duration - elapsed).min(SLEEP_STEP));
        }
    }

    /// Return a guard that cancels this token when dropped, including on panic.
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

pub struct CancelGuard(Cancellation);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
