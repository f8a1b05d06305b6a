//! Observability counters for sinks, dispatchers and front-ends.
//!
//! All counters use atomic operations for thread-safe updates and reads.
//! Workers increment them while any thread reads them. A snapshot of several
//! counters is not atomic as a whole; each value is individually consistent.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, zero if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().try_into().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn nanos(duration: Duration) -> u64 {
    duration.as_nanos().try_into().unwrap_or(u64::MAX)
}

/// Per-sink statistics.
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    inner: Arc<SinkStatsInner>,
}

#[derive(Debug, Default)]
struct SinkStatsInner {
    logged_events: AtomicU64,
    logged_activities: AtomicU64,
    logged_snapshots: AtomicU64,
    logged_messages: AtomicU64,
    write_count: AtomicU64,
    /// Failed a filter or rejected by the limiter
    skipped: AtomicU64,
    listener_errors: AtomicU64,
    last_write_ms: AtomicU64,
    last_error_ms: AtomicU64,
}

impl SinkStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_event(&self) {
        self.inner.logged_events.fetch_add(1, Ordering::Relaxed);
        self.record_write();
    }

    pub(crate) fn record_activity(&self) {
        self.inner.logged_activities.fetch_add(1, Ordering::Relaxed);
        self.record_write();
    }

    pub(crate) fn record_snapshot(&self) {
        self.inner.logged_snapshots.fetch_add(1, Ordering::Relaxed);
        self.record_write();
    }

    pub(crate) fn record_message(&self) {
        self.inner.logged_messages.fetch_add(1, Ordering::Relaxed);
        self.record_write();
    }

    fn record_write(&self) {
        self.inner.write_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_write_ms
            .store(unix_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_error(&self) {
        self.inner.listener_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error_time(&self) {
        self.inner
            .last_error_ms
            .store(unix_millis(), Ordering::Relaxed);
    }

    /// Number of items written.
    pub fn write_count(&self) -> u64 {
        self.inner.write_count.load(Ordering::Relaxed)
    }

    /// Number of items that failed a filter or were rejected by the limiter.
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Number of listener callbacks that panicked.
    pub fn listener_errors(&self) -> u64 {
        self.inner.listener_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        let i = &self.inner;
        SinkStatsSnapshot {
            logged_events: i.logged_events.load(Ordering::Relaxed),
            logged_activities: i.logged_activities.load(Ordering::Relaxed),
            logged_snapshots: i.logged_snapshots.load(Ordering::Relaxed),
            logged_messages: i.logged_messages.load(Ordering::Relaxed),
            write_count: i.write_count.load(Ordering::Relaxed),
            skipped: i.skipped.load(Ordering::Relaxed),
            listener_errors: i.listener_errors.load(Ordering::Relaxed),
            last_write_ms: i.last_write_ms.load(Ordering::Relaxed),
            last_error_ms: i.last_error_ms.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        let i = &self.inner;
        for counter in [
            &i.logged_events,
            &i.logged_activities,
            &i.logged_snapshots,
            &i.logged_messages,
            &i.write_count,
            &i.skipped,
            &i.listener_errors,
            &i.last_write_ms,
            &i.last_error_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of sink statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStatsSnapshot {
    /// Tracking events written
    pub logged_events: u64,
    /// Activities written
    pub logged_activities: u64,
    /// Snapshots written
    pub logged_snapshots: u64,
    /// Messages written
    pub logged_messages: u64,
    /// Total writes
    pub write_count: u64,
    /// Failed a filter or rejected by the limiter
    pub skipped: u64,
    /// Listener callbacks that panicked
    pub listener_errors: u64,
    /// Unix millis of the last write, zero if none
    pub last_write_ms: u64,
    /// Unix millis of the last error, zero if none
    pub last_error_ms: u64,
}

impl SinkStatsSnapshot {
    /// Add the counters to a flat statistics map.
    pub fn export(&self, map: &mut BTreeMap<String, u64>) {
        map.insert("sink-logged-events".into(), self.logged_events);
        map.insert("sink-logged-activities".into(), self.logged_activities);
        map.insert("sink-logged-snapshots".into(), self.logged_snapshots);
        map.insert("sink-logged-messages".into(), self.logged_messages);
        map.insert("sink-write-count".into(), self.write_count);
        map.insert("sink-skipped".into(), self.skipped);
        map.insert("sink-listener-errors".into(), self.listener_errors);
        map.insert("sink-last-write-ms".into(), self.last_write_ms);
        map.insert("sink-last-error-ms".into(), self.last_error_ms);
    }
}

/// Pooled dispatcher statistics.
///
/// Everything here only grows, except through [`reset`](DispatcherStats::reset).
/// Live queue sizes are read from the queues themselves.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    inner: Arc<DispatcherStatsInner>,
}

#[derive(Debug, Default)]
struct DispatcherStatsInner {
    dropped: AtomicU64,
    skipped: AtomicU64,
    requeued: AtomicU64,
    logged: AtomicU64,
    total: AtomicU64,
    exceptions: AtomicU64,
    recoveries: AtomicU64,
    signals: AtomicU64,
    last_service_nanos: AtomicU64,
    total_service_nanos: AtomicU64,
}

impl DispatcherStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dropped(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued(&self) {
        self.inner.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_logged(&self, service_time: Duration) {
        let n = nanos(service_time);
        self.inner.logged.fetch_add(1, Ordering::Relaxed);
        self.inner.last_service_nanos.store(n, Ordering::Relaxed);
        self.inner
            .total_service_nanos
            .fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_taken(&self) {
        self.inner.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exception(&self) {
        self.inner.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.inner.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_signal(&self) {
        self.inner.signals.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes refused because a queue was full or the pool was shut down.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Envelopes abandoned because the delay queue was full or had no target.
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Envelopes moved from the delay queue back to the work queue.
    pub fn requeued(&self) -> u64 {
        self.inner.requeued.load(Ordering::Relaxed)
    }

    /// Envelopes delivered successfully.
    pub fn logged(&self) -> u64 {
        self.inner.logged.load(Ordering::Relaxed)
    }

    /// Data envelopes taken by workers.
    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Failed delivery attempts.
    pub fn exceptions(&self) -> u64 {
        self.inner.exceptions.load(Ordering::Relaxed)
    }

    /// Successful reopens after an error.
    pub fn recoveries(&self) -> u64 {
        self.inner.recoveries.load(Ordering::Relaxed)
    }

    /// Signals processed.
    pub fn signals(&self) -> u64 {
        self.inner.signals.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        let i = &self.inner;
        DispatcherStatsSnapshot {
            dropped: i.dropped.load(Ordering::Relaxed),
            skipped: i.skipped.load(Ordering::Relaxed),
            requeued: i.requeued.load(Ordering::Relaxed),
            logged: i.logged.load(Ordering::Relaxed),
            total: i.total.load(Ordering::Relaxed),
            exceptions: i.exceptions.load(Ordering::Relaxed),
            recoveries: i.recoveries.load(Ordering::Relaxed),
            signals: i.signals.load(Ordering::Relaxed),
            last_service_nanos: i.last_service_nanos.load(Ordering::Relaxed),
            total_service_nanos: i.total_service_nanos.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        let i = &self.inner;
        for counter in [
            &i.dropped,
            &i.skipped,
            &i.requeued,
            &i.logged,
            &i.total,
            &i.exceptions,
            &i.recoveries,
            &i.signals,
            &i.last_service_nanos,
            &i.total_service_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of dispatcher statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStatsSnapshot {
    /// Refused envelopes
    pub dropped: u64,
    /// Abandoned envelopes
    pub skipped: u64,
    /// Replayed from the delay queue
    pub requeued: u64,
    /// Delivered envelopes
    pub logged: u64,
    /// Data envelopes taken by workers
    pub total: u64,
    /// Failed delivery attempts
    pub exceptions: u64,
    /// Successful reopens after an error
    pub recoveries: u64,
    /// Signals processed
    pub signals: u64,
    /// Service time of the last delivery
    pub last_service_nanos: u64,
    /// Cumulative service time
    pub total_service_nanos: u64,
}

impl DispatcherStatsSnapshot {
    /// Add the counters to a flat statistics map.
    pub fn export(&self, map: &mut BTreeMap<String, u64>) {
        map.insert("pool-dropped".into(), self.dropped);
        map.insert("pool-skipped".into(), self.skipped);
        map.insert("pool-requeued".into(), self.requeued);
        map.insert("pool-logged".into(), self.logged);
        map.insert("pool-total".into(), self.total);
        map.insert("pool-exceptions".into(), self.exceptions);
        map.insert("pool-recoveries".into(), self.recoveries);
        map.insert("pool-signals".into(), self.signals);
        map.insert("pool-last-service-nanos".into(), self.last_service_nanos);
        map.insert("pool-total-service-nanos".into(), self.total_service_nanos);
    }

    /// Mean service time per delivered envelope.
    pub fn mean_service_time(&self) -> Duration {
        if self.logged == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_service_nanos / self.logged)
        }
    }
}

/// Buffering front-end statistics.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    inner: Arc<BufferStatsInner>,
}

#[derive(Debug, Default)]
struct BufferStatsInner {
    skipped: AtomicU64,
    dropped: AtomicU64,
    signal_timeouts: AtomicU64,
    requeued_on_error: AtomicU64,
}

impl BufferStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_signal_timeout(&self) {
        self.inner.signal_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued_on_error(&self) {
        self.inner
            .requeued_on_error
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Items that failed `is_loggable`.
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Items refused by the dispatcher.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Signals that were not acknowledged in time.
    pub fn signal_timeouts(&self) -> u64 {
        self.inner.signal_timeouts.load(Ordering::Relaxed)
    }

    /// Items handed back to the delay queue by the error listener.
    pub fn requeued_on_error(&self) -> u64 {
        self.inner.requeued_on_error.load(Ordering::Relaxed)
    }

    /// Add the counters to a flat statistics map.
    pub fn export(&self, map: &mut BTreeMap<String, u64>) {
        map.insert("buffer-skipped".into(), self.skipped());
        map.insert("buffer-dropped".into(), self.dropped());
        map.insert("buffer-signal-timeouts".into(), self.signal_timeouts());
        map.insert("buffer-requeued-on-error".into(), self.requeued_on_error());
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        let i = &self.inner;
        for counter in [
            &i.skipped,
            &i.dropped,
            &i.signal_timeouts,
            &i.requeued_on_error,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
