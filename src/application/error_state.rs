//! Latched error state shared by sinks.
//!
//! A sink enters error state when an operation fails and leaves it on the next
//! successful write or reopen. The dispatcher reads the latch time to throttle
//! reopen attempts, so the flag and timestamp are readable without locking.

use crate::application::error::SinkError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free error flag with the last error kept for inspection.
#[derive(Debug)]
pub struct ErrorLatch {
    active: AtomicBool,
    error_count: AtomicU64,
    /// Nanoseconds since `epoch` plus one; zero means "never"
    last_error_nanos: AtomicU64,
    last_error: Mutex<Option<SinkError>>,
    /// Reference epoch for timestamp calculations
    epoch: Instant,
}

impl ErrorLatch {
    /// Create a cleared latch whose timestamps are relative to `epoch`.
    pub fn new(epoch: Instant) -> Self {
        Self {
            active: AtomicBool::new(false),
            error_count: AtomicU64::new(0),
            last_error_nanos: AtomicU64::new(0),
            last_error: Mutex::new(None),
            epoch,
        }
    }

    /// Latch `error` as the current error.
    pub fn set(&self, error: SinkError, now: Instant) {
        let nanos: u64 = now
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX - 1);
        *self.last_error.lock() = Some(error);
        self.last_error_nanos.store(nanos + 1, Ordering::Release);
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }

    /// Leave error state. The last error and its time stay readable.
    pub fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the latch is set.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The latched error, if active.
    pub fn current(&self) -> Option<SinkError> {
        if self.is_active() {
            self.last_error.lock().clone()
        } else {
            None
        }
    }

    /// The most recent error, active or not.
    pub fn last_error(&self) -> Option<SinkError> {
        self.last_error.lock().clone()
    }

    /// When the most recent error was latched.
    pub fn last_error_time(&self) -> Option<Instant> {
        match self.last_error_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(self.epoch + Duration::from_nanos(n - 1)),
        }
    }

    /// Total number of errors latched.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Zero the error counter.
    pub fn reset_count(&self) {
        self.error_count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn write_error(reason: &str) -> SinkError {
        SinkError::Write {
            sink: "test".to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_initial_state() {
        let latch = ErrorLatch::new(Instant::now());
        assert!(!latch.is_active());
        assert!(latch.current().is_none());
        assert!(latch.last_error_time().is_none());
        assert_eq!(latch.error_count(), 0);
    }

    #[test]
    fn test_set_and_clear() {
        let epoch = Instant::now();
        let latch = ErrorLatch::new(epoch);
        let at = epoch + Duration::from_millis(250);

        latch.set(write_error("disk full"), at);
        assert!(latch.is_active());
        assert_eq!(latch.current(), Some(write_error("disk full")));
        assert_eq!(latch.last_error_time(), Some(at));

        latch.clear();
        assert!(!latch.is_active());
        assert!(latch.current().is_none());
        // History survives the clear
        assert_eq!(latch.last_error(), Some(write_error("disk full")));
        assert_eq!(latch.last_error_time(), Some(at));
        assert_eq!(latch.error_count(), 1);
    }

    #[test]
    fn test_error_at_epoch_is_recorded() {
        let epoch = Instant::now();
        let latch = ErrorLatch::new(epoch);
        latch.set(write_error("boom"), epoch);
        assert_eq!(latch.last_error_time(), Some(epoch));
    }

    #[test]
    fn test_concurrent_sets() {
        let latch = Arc::new(ErrorLatch::new(Instant::now()));
        let mut handles = vec![];

        for i in 0..8 {
            let latch = Arc::clone(&latch);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    latch.set(write_error(&format!("worker {}", i)), Instant::now());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(latch.error_count(), 400);
        assert!(latch.is_active());
    }
}
