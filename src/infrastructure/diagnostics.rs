//! Internal diagnostics.
//!
//! Pipeline failures are reported through `tracing`, never returned to
//! producers. [`RateLimitedReporter`] keeps a failing sink from flooding the
//! log: it emits at most one report per interval and carries the number of
//! reports it swallowed in between.

use crate::application::error::SinkError;
use crate::application::ports::DiagnosticSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default interval between two delivery-failure reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default [`DiagnosticSink`]: one `tracing::error!` per unlistened failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl TracingDiagnostics {
    /// Create the adapter.
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, sink: &str, error: &SinkError) {
        tracing::error!(sink = %sink, error = %error, "sink failure with no error listener");
    }
}

/// Reports at most once per interval.
#[derive(Debug)]
pub struct RateLimitedReporter {
    min_interval: Duration,
    last_report: Mutex<Option<Instant>>,
    /// Reports since the last one emitted
    pending: AtomicU64,
    total: AtomicU64,
}

impl RateLimitedReporter {
    /// Create a reporter emitting at most once per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_report: Mutex::new(None),
            pending: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record a delivery failure and log it if the interval has passed.
    ///
    /// Returns `true` if it was logged, `false` if suppressed.
    pub fn report(&self, pool: &str, sink: &str, error: &SinkError) -> bool {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);

        if !self.should_emit(Instant::now()) {
            return false;
        }

        let count = self.pending.swap(0, Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        if count > 1 {
            tracing::warn!(
                pool = %pool,
                sink = %sink,
                error = %error,
                suppressed_count = count - 1,
                total_failures = total,
                "delivery failed (rate-limited)"
            );
        } else {
            tracing::warn!(
                pool = %pool,
                sink = %sink,
                error = %error,
                total_failures = total,
                "delivery failed"
            );
        }
        true
    }

    fn should_emit(&self, now: Instant) -> bool {
        let mut last = self.last_report.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Failures recorded since the last emitted report.
    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Failures ever recorded.
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Reset counters and the interval.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        *self.last_report.lock() = None;
    }
}

impl Default for RateLimitedReporter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}
