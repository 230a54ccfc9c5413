//! Cooperative cancellation for in-flight operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot, sticky stop signal.
///
/// Cloned handles share the same latch: the first `stop` call is
/// observed by every holder, and the signal never resets. Cancellation
/// is cooperative; the planner and runner poll at safe points and an
/// in-flight database call is allowed to complete.
///
/// # Examples
///
/// ```
/// use rustmigrate::GracefulStop;
///
/// let stop = GracefulStop::new();
/// let handle = stop.clone();
///
/// assert!(!stop.is_stopped());
/// handle.stop();
/// assert!(stop.is_stopped());
/// ```
#[derive(Clone, Debug, Default)]
pub struct GracefulStop {
    stopped: Arc<AtomicBool>,
}

impl GracefulStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once any handle has requested a stop.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_latches_across_clones() {
        let stop = GracefulStop::new();
        let observer = stop.clone();
        assert!(!observer.is_stopped());

        stop.stop();
        assert!(observer.is_stopped());

        // Sticky: repeated checks keep observing the stop.
        stop.stop();
        assert!(stop.is_stopped());
        assert!(observer.is_stopped());
    }
}
