//! Managed sink: lifecycle, filtering, statistics and rate limiting around a
//! [`SinkWriter`].
//!
//! A sink is either closed or open, and while open it may be latched in error
//! state. Logging to a closed sink is refused. Write failures are latched,
//! counted and handed to the registered error listeners; when there are none
//! the failure goes to the configured [`DiagnosticSink`] so it is never lost.
//! Either way the caller gets the error back as a value, marked
//! [`SinkError::Handled`] when a listener took it.

use crate::application::error::{BuildError, SinkError, WriteError};
use crate::application::error_state::ErrorLatch;
use crate::application::limiter::EventLimiter;
use crate::application::metrics::SinkStats;
use crate::application::ports::{
    Clock, CompletedRecord, DiagnosticSink, EventSink, SinkErrorEvent, SinkErrorListener,
    SinkEventFilter, SinkLogListener, SinkWriter,
};
use crate::domain::payload::{Payload, Ttl};
use crate::domain::severity::Severity;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::diagnostics::TracingDiagnostics;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A sink with the bookkeeping every concrete transport shares.
pub struct ManagedSink<W: SinkWriter> {
    name: String,
    writer: W,
    open: AtomicBool,
    /// Serializes open and close
    lifecycle: Mutex<()>,
    min_severity: AtomicU8,
    filter_on_log: AtomicBool,
    ttl: RwLock<Ttl>,
    filters: RwLock<Vec<Arc<dyn SinkEventFilter>>>,
    error_listeners: RwLock<Vec<Arc<dyn SinkErrorListener>>>,
    log_listeners: RwLock<Vec<Arc<dyn SinkLogListener>>>,
    limiter: RwLock<Option<Arc<EventLimiter>>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    latch: ErrorLatch,
    stats: SinkStats,
    clock: Arc<dyn Clock>,
}

impl<W: SinkWriter> ManagedSink<W> {
    /// Create a builder.
    pub fn builder() -> ManagedSinkBuilder<W> {
        ManagedSinkBuilder::new()
    }

    /// The wrapped transport.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Minimum severity accepted by [`is_loggable`](EventSink::is_loggable).
    pub fn min_severity(&self) -> Severity {
        Severity::from(self.min_severity.load(Ordering::Relaxed))
    }

    /// Change the severity gate.
    pub fn set_min_severity(&self, severity: Severity) {
        self.min_severity.store(severity.as_u8(), Ordering::Relaxed);
    }

    /// TTL stamped on every written item, `Ttl::Inherit` to keep the item's own.
    pub fn ttl(&self) -> Ttl {
        *self.ttl.read()
    }

    /// Change the TTL override.
    pub fn set_ttl(&self, ttl: Ttl) {
        *self.ttl.write() = ttl;
    }

    /// Append a filter to the chain.
    pub fn add_filter(&self, filter: Arc<dyn SinkEventFilter>) {
        self.filters.write().push(filter);
    }

    /// Remove a filter previously added.
    pub fn remove_filter(&self, filter: &Arc<dyn SinkEventFilter>) {
        self.filters.write().retain(|f| !Arc::ptr_eq(f, filter));
    }

    /// Register a listener for successful writes.
    pub fn add_log_listener(&self, listener: Arc<dyn SinkLogListener>) {
        self.log_listeners.write().push(listener);
    }

    /// Remove a log listener.
    pub fn remove_log_listener(&self, listener: &Arc<dyn SinkLogListener>) {
        self.log_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Replace the limiter; `None` removes limiting.
    pub fn set_limiter(&self, limiter: Option<Arc<EventLimiter>>) {
        *self.limiter.write() = limiter;
    }

    /// The current limiter.
    pub fn limiter(&self) -> Option<Arc<EventLimiter>> {
        self.limiter.read().clone()
    }

    /// Sink counters.
    pub fn sink_stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Number of errors latched since creation or the last reset.
    pub fn error_count(&self) -> u64 {
        self.latch.error_count()
    }

    /// Zero the counters of the sink and its limiter.
    pub fn reset_stats(&self) {
        self.stats.reset();
        self.latch.reset_count();
        if let Some(limiter) = self.limiter() {
            limiter.reset_stats();
        }
    }

    fn write_payload(&self, payload: &Payload) -> Result<(), WriteError> {
        match payload {
            Payload::Event(event) => self.writer.write_event(event),
            Payload::Activity(activity) => self.writer.write_activity(activity),
            Payload::Snapshot(snapshot) => self.writer.write_snapshot(snapshot),
            Payload::Message(message) => self.writer.write_message(message),
        }
    }

    fn record_written(&self, payload: &Payload) {
        match payload {
            Payload::Event(_) => self.stats.record_event(),
            Payload::Activity(_) => self.stats.record_activity(),
            Payload::Snapshot(_) => self.stats.record_snapshot(),
            Payload::Message(_) => self.stats.record_message(),
        }
    }

    /// Latch `error` and route it to listeners or diagnostics.
    ///
    /// Returns `true` when at least one listener received it.
    fn fail(&self, error: &SinkError, payload: Option<&Payload>) -> bool {
        self.latch.set(error.clone(), self.clock.now());
        self.stats.record_error_time();

        let listeners = self.error_listeners.read().clone();
        if listeners.is_empty() {
            self.diagnostics.report(&self.name, error);
            return false;
        }

        let event = SinkErrorEvent {
            sink: &self.name,
            error,
            payload,
        };
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.sink_error(&event)));
            if outcome.is_err() {
                self.stats.record_listener_error();
            }
        }
        true
    }

    fn notify_logged(&self, payload: &Payload) {
        let listeners = self.log_listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let record = CompletedRecord {
            sink: &self.name,
            payload,
            completed_at: self.clock.now(),
        };
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.sink_logged(&record)));
            if outcome.is_err() {
                self.stats.record_listener_error();
            }
        }
    }
}

impl<W: SinkWriter> EventSink for ManagedSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), SinkError> {
        let _guard = self.lifecycle.lock();
        if self.open.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.writer.open() {
            Ok(()) => {
                self.open.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                let error = SinkError::Open {
                    sink: self.name.clone(),
                    reason: e.to_string(),
                };
                self.fail(&error, None);
                Err(error)
            }
        }
    }

    fn close(&self) -> Result<(), SinkError> {
        let _guard = self.lifecycle.lock();
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.writer.close().map_err(|e| {
            let error = SinkError::Close {
                sink: self.name.clone(),
                reason: e.to_string(),
            };
            self.fail(&error, None);
            error
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), SinkError> {
        if !self.is_open() {
            return Ok(());
        }
        self.writer.flush().map_err(|e| {
            let error = SinkError::Flush {
                sink: self.name.clone(),
                reason: e.to_string(),
            };
            self.fail(&error, None);
            error
        })
    }

    fn error_state(&self) -> Option<SinkError> {
        self.latch.current()
    }

    fn set_error_state(&self, error: Option<SinkError>) {
        match error {
            Some(error) => {
                self.latch.set(error, self.clock.now());
                self.stats.record_error_time();
            }
            None => self.latch.clear(),
        }
    }

    fn last_error_time(&self) -> Option<Instant> {
        self.latch.last_error_time()
    }

    fn error_age(&self) -> Option<Duration> {
        self.latch
            .last_error_time()
            .map(|at| self.clock.now().saturating_duration_since(at))
    }

    fn is_loggable(&self, payload: &Payload) -> bool {
        let passes = self.accepts(payload);
        if !passes {
            self.stats.record_skipped();
        }
        passes
    }

    fn accepts(&self, payload: &Payload) -> bool {
        payload.severity() >= self.min_severity()
            && self
                .filters
                .read()
                .iter()
                .all(|filter| filter.accept(&self.name, payload))
    }

    fn log(&self, payload: Payload) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::NotOpen {
                sink: self.name.clone(),
            });
        }
        if self.filter_on_log() && !self.is_loggable(&payload) {
            return Ok(());
        }

        let payload = match self.ttl() {
            Ttl::Inherit => payload,
            ttl => payload.with_ttl(ttl),
        };

        if let Some(limiter) = self.limiter() {
            let size = payload.estimated_size() as u64;
            if !limiter.obtain(1, size) {
                self.stats.record_skipped();
                return Ok(());
            }
        }

        match self.write_payload(&payload) {
            Ok(()) => {
                self.record_written(&payload);
                self.latch.clear();
                self.notify_logged(&payload);
                Ok(())
            }
            Err(e) => {
                let error = SinkError::Write {
                    sink: self.name.clone(),
                    reason: e.to_string(),
                };
                if self.fail(&error, Some(&payload)) {
                    Err(SinkError::Handled(Box::new(error)))
                } else {
                    Err(error)
                }
            }
        }
    }

    fn filter_on_log(&self) -> bool {
        self.filter_on_log.load(Ordering::Relaxed)
    }

    fn set_filter_on_log(&self, enabled: bool) {
        self.filter_on_log.store(enabled, Ordering::Relaxed);
    }

    fn add_error_listener(&self, listener: Arc<dyn SinkErrorListener>) {
        self.error_listeners.write().push(listener);
    }

    fn remove_error_listener(&self, listener: &Arc<dyn SinkErrorListener>) {
        self.error_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn stats(&self) -> BTreeMap<String, u64> {
        let mut map = BTreeMap::new();
        self.stats.snapshot().export(&mut map);
        map.insert("sink-errors".into(), self.latch.error_count());
        if let Some(limiter) = self.limiter() {
            limiter.snapshot().export(&mut map);
        }
        map
    }
}

impl<W: SinkWriter> fmt::Debug for ManagedSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSink")
            .field("name", &self.name)
            .field("writer", &self.writer)
            .field("open", &self.is_open())
            .field("min_severity", &self.min_severity())
            .field("error", &self.latch.is_active())
            .finish()
    }
}

/// Builder for [`ManagedSink`].
pub struct ManagedSinkBuilder<W: SinkWriter> {
    name: Option<String>,
    writer: Option<W>,
    min_severity: Severity,
    filter_on_log: bool,
    ttl: Ttl,
    limiter: Option<Arc<EventLimiter>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<W: SinkWriter> ManagedSinkBuilder<W> {
    fn new() -> Self {
        Self {
            name: None,
            writer: None,
            min_severity: Severity::None,
            filter_on_log: true,
            ttl: Ttl::Inherit,
            limiter: None,
            diagnostics: None,
            clock: None,
        }
    }

    /// Set the sink name (required).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the transport (required).
    pub fn with_writer(mut self, writer: W) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Reject items below this severity.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Whether `log` re-checks `is_loggable` (default: true).
    pub fn with_filter_on_log(mut self, enabled: bool) -> Self {
        self.filter_on_log = enabled;
        self
    }

    /// Override the TTL of every written item.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Rate limit writes.
    pub fn with_limiter(mut self, limiter: Arc<EventLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Where failures go when no error listener is registered.
    ///
    /// Defaults to [`TracingDiagnostics`].
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Set a custom clock (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the sink in the closed state.
    ///
    /// # Errors
    /// Returns `BuildError::EmptyName` or `BuildError::MissingWriter`.
    pub fn build(self) -> Result<ManagedSink<W>, BuildError> {
        let name = self.name.filter(|n| !n.is_empty()).ok_or(BuildError::EmptyName)?;
        let writer = self.writer.ok_or(BuildError::MissingWriter)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingDiagnostics::new()));

        Ok(ManagedSink {
            name,
            writer,
            open: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            min_severity: AtomicU8::new(self.min_severity.as_u8()),
            filter_on_log: AtomicBool::new(self.filter_on_log),
            ttl: RwLock::new(self.ttl),
            filters: RwLock::new(Vec::new()),
            error_listeners: RwLock::new(Vec::new()),
            log_listeners: RwLock::new(Vec::new()),
            limiter: RwLock::new(self.limiter),
            diagnostics,
            latch: ErrorLatch::new(clock.now()),
            stats: SinkStats::new(),
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::limiter::{LimiterConfig, LimiterMode};
    use crate::domain::payload::{Activity, Message, Snapshot, TrackingEvent};
    use crate::infrastructure::filters::FnFilter;
    use crate::infrastructure::mocks::MockClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Writer that fails while `failing` is set and records written ids.
    #[derive(Debug, Default)]
    struct FlakyWriter {
        failing: AtomicBool,
        written: Mutex<Vec<String>>,
        flushes: AtomicUsize,
    }

    impl SinkWriter for FlakyWriter {
        fn flush(&self) -> Result<(), WriteError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_event(&self, event: &TrackingEvent) -> Result<(), WriteError> {
            self.write(&event.tracking_id)
        }

        fn write_activity(&self, activity: &Activity) -> Result<(), WriteError> {
            self.write(&activity.id)
        }

        fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), WriteError> {
            self.write(&snapshot.name)
        }

        fn write_message(&self, message: &Message) -> Result<(), WriteError> {
            self.write(&message.formatted())
        }
    }

    impl FlakyWriter {
        fn write(&self, id: &str) -> Result<(), WriteError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(WriteError::msg("connection reset"));
            }
            self.written.lock().push(id.to_string());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct CountingDiagnostics {
        reports: AtomicUsize,
    }

    impl DiagnosticSink for CountingDiagnostics {
        fn report(&self, _sink: &str, _error: &SinkError) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CollectingListener {
        seen: Mutex<Vec<Option<String>>>,
    }

    impl SinkErrorListener for CollectingListener {
        fn sink_error(&self, event: &SinkErrorEvent<'_>) {
            self.seen
                .lock()
                .push(event.payload.and_then(|p| p.tracking_id().map(String::from)));
        }
    }

    struct PanickingListener;

    impl SinkErrorListener for PanickingListener {
        fn sink_error(&self, _event: &SinkErrorEvent<'_>) {
            panic!("listener bug");
        }
    }

    impl SinkLogListener for PanickingListener {
        fn sink_logged(&self, _record: &CompletedRecord<'_>) {
            panic!("listener bug");
        }
    }

    fn sink() -> ManagedSink<FlakyWriter> {
        ManagedSink::builder()
            .with_name("test")
            .with_writer(FlakyWriter::default())
            .build()
            .unwrap()
    }

    fn event(id: &str) -> TrackingEvent {
        TrackingEvent::new(id, "op")
    }

    #[test]
    fn test_build_requires_name_and_writer() {
        let err = ManagedSink::<FlakyWriter>::builder()
            .with_writer(FlakyWriter::default())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::EmptyName);

        let err = ManagedSink::<FlakyWriter>::builder()
            .with_name("x")
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingWriter);
    }

    #[test]
    fn test_log_requires_open() {
        let sink = sink();
        let err = sink.log_event(event("a")).unwrap_err();
        assert_eq!(
            err,
            SinkError::NotOpen {
                sink: "test".to_string()
            }
        );

        sink.open().unwrap();
        sink.log_event(event("a")).unwrap();
        sink.close().unwrap();
        assert!(sink.log_event(event("b")).is_err());
    }

    #[test]
    fn test_open_and_close_are_idempotent() {
        let sink = sink();
        sink.open().unwrap();
        sink.open().unwrap();
        assert!(sink.is_open());

        sink.close().unwrap();
        sink.close().unwrap();
        assert!(!sink.is_open());

        sink.reopen().unwrap();
        assert!(sink.is_open());
    }

    #[test]
    fn test_counts_per_kind() {
        let sink = sink();
        sink.open().unwrap();

        sink.log_event(event("e")).unwrap();
        sink.log_activity(Activity::new("a", "batch")).unwrap();
        sink.log_snapshot(Snapshot::new("s", "jvm")).unwrap();
        sink.write("hello {}", vec!["world".to_string()]).unwrap();

        let stats = sink.stats();
        assert_eq!(stats["sink-logged-events"], 1);
        assert_eq!(stats["sink-logged-activities"], 1);
        assert_eq!(stats["sink-logged-snapshots"], 1);
        assert_eq!(stats["sink-logged-messages"], 1);
        assert_eq!(stats["sink-write-count"], 4);
        assert_eq!(
            *sink.writer().written.lock(),
            vec!["e", "a", "s", "hello world"]
        );
    }

    #[test]
    fn test_severity_gate_and_filter_chain_skip_once() {
        let sink = ManagedSink::builder()
            .with_name("gated")
            .with_writer(FlakyWriter::default())
            .with_min_severity(Severity::Warning)
            .build()
            .unwrap();
        sink.open().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let first_calls = Arc::clone(&calls);
        let second_calls = Arc::clone(&calls);
        sink.add_filter(Arc::new(FnFilter::new(move |_, _| {
            first_calls.fetch_add(1, Ordering::SeqCst);
            false
        })));
        sink.add_filter(Arc::new(FnFilter::new(move |_, _| {
            second_calls.fetch_add(1, Ordering::SeqCst);
            false
        })));

        // Below the gate: filters never run
        sink.log_message(Severity::Info, "quiet", vec![]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // First filter rejects, second never runs
        sink.log_message(Severity::Error, "loud", vec![]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(sink.sink_stats().skipped(), 2);
        assert!(sink.writer().written.lock().is_empty());
    }

    #[test]
    fn test_remove_filter() {
        let sink = sink();
        sink.open().unwrap();
        let filter: Arc<dyn SinkEventFilter> = Arc::new(FnFilter::new(|_, _| false));

        sink.add_filter(Arc::clone(&filter));
        sink.log_event(event("dropped")).unwrap();
        sink.remove_filter(&filter);
        sink.log_event(event("kept")).unwrap();

        assert_eq!(*sink.writer().written.lock(), vec!["kept"]);
    }

    #[test]
    fn test_filter_on_log_disabled_trusts_caller() {
        let sink = sink();
        sink.open().unwrap();
        sink.add_filter(Arc::new(FnFilter::new(|_, _| false)));
        sink.set_filter_on_log(false);

        sink.log_event(event("trusted")).unwrap();
        assert_eq!(*sink.writer().written.lock(), vec!["trusted"]);
        assert_eq!(sink.sink_stats().skipped(), 0);
    }

    #[test]
    fn test_ttl_override() {
        #[derive(Debug, Default)]
        struct TtlWriter(Mutex<Vec<Ttl>>);

        impl SinkWriter for TtlWriter {
            fn write_event(&self, event: &TrackingEvent) -> Result<(), WriteError> {
                self.0.lock().push(event.ttl);
                Ok(())
            }
            fn write_activity(&self, activity: &Activity) -> Result<(), WriteError> {
                self.0.lock().push(activity.ttl);
                Ok(())
            }
            fn write_snapshot(&self, _snapshot: &Snapshot) -> Result<(), WriteError> {
                Ok(())
            }
            fn write_message(&self, message: &Message) -> Result<(), WriteError> {
                self.0.lock().push(message.ttl);
                Ok(())
            }
        }

        let sink = ManagedSink::builder()
            .with_name("ttl")
            .with_writer(TtlWriter::default())
            .with_ttl(Ttl::Seconds(30))
            .build()
            .unwrap();
        sink.open().unwrap();
        sink.log_event(event("a").with_ttl(Ttl::Forever)).unwrap();

        sink.set_ttl(Ttl::Inherit);
        sink.log_event(event("b").with_ttl(Ttl::Forever)).unwrap();

        assert_eq!(
            *sink.writer().0.lock(),
            vec![Ttl::Seconds(30), Ttl::Forever]
        );
    }

    #[test]
    fn test_limiter_denial_is_not_an_error() {
        let limiter = Arc::new(EventLimiter::with_clock(
            LimiterConfig::default()
                .with_max_mps(2.0)
                .with_mode(LimiterMode::Timeout(Duration::ZERO)),
            Arc::new(MockClock::new(Instant::now())),
        ));
        let sink = ManagedSink::builder()
            .with_name("limited")
            .with_writer(FlakyWriter::default())
            .with_limiter(limiter)
            .build()
            .unwrap();
        sink.open().unwrap();

        for i in 0..3 {
            sink.log_event(event(&i.to_string())).unwrap();
        }

        let stats = sink.stats();
        assert_eq!(stats["sink-write-count"], 2);
        assert_eq!(stats["sink-skipped"], 1);
        assert_eq!(stats["limiter-denied"], 1);
        assert!(sink.error_state().is_none());

        sink.set_limiter(None);
        sink.log_event(event("free")).unwrap();
        assert_eq!(sink.sink_stats().write_count(), 3);
    }

    #[test]
    fn test_failure_without_listeners_goes_to_diagnostics() {
        let diagnostics = Arc::new(CountingDiagnostics::default());
        let clock = MockClock::new(Instant::now());
        let sink = ManagedSink::builder()
            .with_name("flaky")
            .with_writer(FlakyWriter::default())
            .with_diagnostics(diagnostics.clone())
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        sink.open().unwrap();
        sink.writer().failing.store(true, Ordering::SeqCst);

        let err = sink.log_event(event("x")).unwrap_err();
        assert!(!err.is_handled());
        assert!(matches!(err, SinkError::Write { .. }));
        assert_eq!(diagnostics.reports.load(Ordering::SeqCst), 1);
        assert_eq!(sink.error_state(), Some(err));
        assert_eq!(sink.last_error_time(), Some(clock.now()));
        assert_eq!(sink.error_age(), Some(Duration::ZERO));
        clock.advance(Duration::from_secs(3));
        assert_eq!(sink.error_age(), Some(Duration::from_secs(3)));
        assert_eq!(sink.stats()["sink-errors"], 1);

        // A successful write clears the latch
        sink.writer().failing.store(false, Ordering::SeqCst);
        sink.log_event(event("y")).unwrap();
        assert!(sink.error_state().is_none());
    }

    #[test]
    fn test_failure_with_listener_is_handled() {
        let diagnostics = Arc::new(CountingDiagnostics::default());
        let sink = ManagedSink::builder()
            .with_name("flaky")
            .with_writer(FlakyWriter::default())
            .with_diagnostics(diagnostics.clone())
            .build()
            .unwrap();
        let listener = Arc::new(CollectingListener::default());
        sink.add_error_listener(listener.clone());
        sink.open().unwrap();
        sink.writer().failing.store(true, Ordering::SeqCst);

        let err = sink.log_event(event("x")).unwrap_err();
        assert!(err.is_handled());
        assert!(matches!(err.root(), SinkError::Write { .. }));
        assert_eq!(*listener.seen.lock(), vec![Some("x".to_string())]);
        assert_eq!(diagnostics.reports.load(Ordering::SeqCst), 0);

        let as_dyn: Arc<dyn SinkErrorListener> = listener.clone();
        sink.remove_error_listener(&as_dyn);
        let err = sink.log_event(event("z")).unwrap_err();
        assert!(!err.is_handled());
        assert_eq!(listener.seen.lock().len(), 1);
    }

    #[test]
    fn test_panicking_listeners_are_counted() {
        let sink = sink();
        sink.add_error_listener(Arc::new(PanickingListener));
        sink.add_log_listener(Arc::new(PanickingListener));
        sink.open().unwrap();

        sink.log_event(event("ok")).unwrap();
        sink.writer().failing.store(true, Ordering::SeqCst);
        assert!(sink.log_event(event("bad")).unwrap_err().is_handled());

        assert_eq!(sink.sink_stats().listener_errors(), 2);
    }

    #[test]
    fn test_set_error_state_manually() {
        let sink = sink();
        let error = SinkError::NotReady {
            sink: "test".to_string(),
            reason: "manual".to_string(),
        };
        sink.set_error_state(Some(error.clone()));
        assert_eq!(sink.error_state(), Some(error));

        sink.set_error_state(None);
        assert!(sink.error_state().is_none());
        assert!(sink.last_error_time().is_some());
    }

    #[test]
    fn test_flush_reaches_writer() {
        let sink = sink();
        sink.flush().unwrap();
        assert_eq!(sink.writer().flushes.load(Ordering::SeqCst), 0);

        sink.open().unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.writer().flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_stats() {
        let sink = sink();
        sink.open().unwrap();
        sink.log_event(event("a")).unwrap();
        sink.writer().failing.store(true, Ordering::SeqCst);
        let _ = sink.log_event(event("b"));

        sink.reset_stats();
        let stats = sink.stats();
        assert_eq!(stats["sink-write-count"], 0);
        assert_eq!(stats["sink-errors"], 0);
    }
}
