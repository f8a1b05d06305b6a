//! Buffering front-end.
//!
//! [`BufferedSink`] is what producers log to. It filters each item against the
//! downstream sink, wraps it in an envelope and hands it to a shared
//! [`PooledDispatcher`], so producers never wait on downstream I/O unless the
//! front-end is configured to block when the queue is full.
//!
//! Flush, close and shutdown travel through the work queue as signals and are
//! acknowledged by the worker that executes them.

use crate::application::dispatcher::PooledDispatcher;
use crate::application::envelope::{Envelope, SignalKind};
use crate::application::error::{BuildError, SinkError};
use crate::application::metrics::BufferStats;
use crate::application::ports::{Clock, EventSink, SinkErrorEvent, SinkErrorListener};
use crate::domain::payload::Payload;
use crate::infrastructure::clock::SystemClock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Front-end settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BufferedConfig {
    /// Block producers while the queue is full instead of dropping
    pub block_on_full: bool,
    /// Maximum wait for a flush, close or shutdown acknowledgement
    pub signal_timeout: Duration,
}

impl Default for BufferedConfig {
    fn default() -> Self {
        Self {
            block_on_full: false,
            signal_timeout: Duration::from_secs(20),
        }
    }
}

impl BufferedConfig {
    /// Block producers while the queue is full.
    pub fn with_block_on_full(mut self, block_on_full: bool) -> Self {
        self.block_on_full = block_on_full;
        self
    }

    /// Set the signal acknowledgement timeout.
    pub fn with_signal_timeout(mut self, signal_timeout: Duration) -> Self {
        self.signal_timeout = signal_timeout;
        self
    }
}

/// Puts envelopes that failed inside the downstream sink back on the
/// dispatcher's delay queue.
struct RequeueListener {
    sink: Weak<dyn EventSink>,
    dispatcher: PooledDispatcher,
    stats: BufferStats,
    clock: Arc<dyn Clock>,
}

impl SinkErrorListener for RequeueListener {
    fn sink_error(&self, event: &SinkErrorEvent<'_>) {
        let (Some(payload), Some(sink)) = (event.payload, self.sink.upgrade()) else {
            return;
        };
        let envelope = Envelope::data(sink, payload.clone(), self.clock.now())
            .with_failure(event.error.clone());
        if self.dispatcher.delay(envelope) {
            self.stats.record_requeued_on_error();
        } else {
            self.stats.record_dropped();
        }
    }
}

/// Producer-facing sink backed by a pooled dispatcher.
pub struct BufferedSink {
    name: String,
    inner: Arc<dyn EventSink>,
    dispatcher: PooledDispatcher,
    open: AtomicBool,
    block_on_full: AtomicBool,
    signal_timeout: Duration,
    stats: BufferStats,
    requeue: Arc<dyn SinkErrorListener>,
    clock: Arc<dyn Clock>,
}

impl BufferedSink {
    /// Create a builder.
    pub fn builder() -> BufferedSinkBuilder {
        BufferedSinkBuilder::new()
    }

    /// The downstream sink.
    pub fn downstream(&self) -> &Arc<dyn EventSink> {
        &self.inner
    }

    /// The dispatcher this front-end feeds.
    pub fn dispatcher(&self) -> &PooledDispatcher {
        &self.dispatcher
    }

    /// Front-end counters.
    pub fn buffer_stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Whether producers block while the queue is full.
    pub fn block_on_full(&self) -> bool {
        self.block_on_full.load(Ordering::Relaxed)
    }

    /// Switch between blocking and dropping when the queue is full.
    pub fn set_block_on_full(&self, block_on_full: bool) {
        self.block_on_full.store(block_on_full, Ordering::Relaxed);
    }

    /// Maximum wait for a signal acknowledgement.
    pub fn signal_timeout(&self) -> Duration {
        self.signal_timeout
    }

    /// Close the downstream sink and shut the dispatcher down, after every
    /// item already queued has been processed.
    ///
    /// # Errors
    /// Returns the error raised while closing the downstream sink.
    pub fn shutdown(&self) -> Result<(), SinkError> {
        self.open.store(false, Ordering::Release);
        if self.dispatcher.is_shut_down() {
            return Ok(());
        }
        self.send_signal(SignalKind::Shutdown)
    }

    /// Zero the front-end counters and those of the dispatcher.
    pub fn reset_stats(&self) {
        self.stats.reset();
        self.dispatcher.reset_stats();
    }

    fn send_signal(&self, kind: SignalKind) -> Result<(), SinkError> {
        match self
            .dispatcher
            .signal(Arc::clone(&self.inner), kind, self.signal_timeout)
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.stats.record_signal_timeout();
                tracing::warn!(
                    sink = %self.name,
                    signal = %kind,
                    timeout_ms = self.signal_timeout.as_millis() as u64,
                    "signal not acknowledged in time"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl EventSink for BufferedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), SinkError> {
        self.dispatcher.start()?;
        self.inner.open()?;
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if self.dispatcher.is_shut_down() {
            return self.inner.close();
        }
        self.send_signal(SignalKind::Close)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), SinkError> {
        if self.dispatcher.is_shut_down() {
            return self.inner.flush();
        }
        self.send_signal(SignalKind::Flush)
    }

    fn error_state(&self) -> Option<SinkError> {
        self.inner.error_state()
    }

    fn set_error_state(&self, error: Option<SinkError>) {
        self.inner.set_error_state(error);
    }

    fn last_error_time(&self) -> Option<Instant> {
        self.inner.last_error_time()
    }

    fn error_age(&self) -> Option<Duration> {
        self.inner.error_age()
    }

    fn is_loggable(&self, payload: &Payload) -> bool {
        let passes = self.inner.accepts(payload);
        if !passes {
            self.stats.record_skipped();
        }
        passes
    }

    fn accepts(&self, payload: &Payload) -> bool {
        self.inner.accepts(payload)
    }

    fn log(&self, payload: Payload) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::NotOpen {
                sink: self.name.clone(),
            });
        }
        if !self.is_loggable(&payload) {
            return Ok(());
        }

        let envelope = Envelope::data(Arc::clone(&self.inner), payload, self.clock.now());
        if self.block_on_full() {
            self.dispatcher.put(envelope)
        } else {
            if !self.dispatcher.offer(envelope) {
                self.stats.record_dropped();
            }
            Ok(())
        }
    }

    fn add_error_listener(&self, listener: Arc<dyn SinkErrorListener>) {
        self.inner.add_error_listener(listener);
    }

    fn remove_error_listener(&self, listener: &Arc<dyn SinkErrorListener>) {
        self.inner.remove_error_listener(listener);
    }

    fn stats(&self) -> BTreeMap<String, u64> {
        let mut map = self.inner.stats();
        map.extend(self.dispatcher.stats());
        self.stats.export(&mut map);
        map
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        self.inner.remove_error_listener(&self.requeue);
    }
}

impl fmt::Debug for BufferedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedSink")
            .field("name", &self.name)
            .field("downstream", &self.inner.name())
            .field("pool", &self.dispatcher.name())
            .field("open", &self.is_open())
            .field("block_on_full", &self.block_on_full())
            .finish()
    }
}

/// Builder for [`BufferedSink`].
pub struct BufferedSinkBuilder {
    name: Option<String>,
    sink: Option<Arc<dyn EventSink>>,
    dispatcher: Option<PooledDispatcher>,
    config: BufferedConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl BufferedSinkBuilder {
    fn new() -> Self {
        Self {
            name: None,
            sink: None,
            dispatcher: None,
            config: BufferedConfig::default(),
            clock: None,
        }
    }

    /// Set the front-end name. Defaults to the downstream sink's name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the downstream sink (required).
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the dispatcher (required).
    pub fn with_dispatcher(mut self, dispatcher: PooledDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the whole front-end config.
    pub fn with_config(mut self, config: BufferedConfig) -> Self {
        self.config = config;
        self
    }

    /// Block producers while the queue is full.
    pub fn with_block_on_full(mut self, block_on_full: bool) -> Self {
        self.config.block_on_full = block_on_full;
        self
    }

    /// Set the signal acknowledgement timeout.
    pub fn with_signal_timeout(mut self, signal_timeout: Duration) -> Self {
        self.config.signal_timeout = signal_timeout;
        self
    }

    /// Set a custom clock (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the front-end, closed.
    ///
    /// Disables filtering inside the downstream sink's `log` (the front-end
    /// filters before enqueueing) and registers the requeue listener on it.
    ///
    /// # Errors
    /// Returns `BuildError::MissingSink`, `BuildError::MissingDispatcher`,
    /// `BuildError::ZeroSignalTimeout` or `BuildError::EmptyName`.
    pub fn build(self) -> Result<BufferedSink, BuildError> {
        let inner = self.sink.ok_or(BuildError::MissingSink)?;
        let dispatcher = self.dispatcher.ok_or(BuildError::MissingDispatcher)?;
        if self.config.signal_timeout.is_zero() {
            return Err(BuildError::ZeroSignalTimeout);
        }
        let name = self.name.unwrap_or_else(|| inner.name().to_string());
        if name.is_empty() {
            return Err(BuildError::EmptyName);
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let stats = BufferStats::new();

        let requeue: Arc<dyn SinkErrorListener> = Arc::new(RequeueListener {
            sink: Arc::downgrade(&inner),
            dispatcher: dispatcher.clone(),
            stats: stats.clone(),
            clock: Arc::clone(&clock),
        });
        inner.set_filter_on_log(false);
        inner.add_error_listener(Arc::clone(&requeue));

        Ok(BufferedSink {
            name,
            inner,
            dispatcher,
            open: AtomicBool::new(false),
            block_on_full: AtomicBool::new(self.config.block_on_full),
            signal_timeout: self.config.signal_timeout,
            stats,
            requeue,
            clock,
        })
    }
}
