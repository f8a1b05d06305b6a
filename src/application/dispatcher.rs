//! Pooled asynchronous dispatcher.
//!
//! A fixed pool of worker threads drains one bounded FIFO queue and turns each
//! envelope into a call on its target sink. Failed deliveries go to a delay
//! queue and are replayed by one extra thread once the retry interval has
//! passed.
//!
//! # Signal barrier
//!
//! Workers take envelopes one at a time under a take lock and, before
//! releasing it, acquire a barrier guard: shared for data, exclusive for
//! signals. A signal therefore runs after every envelope taken before it has
//! finished and before any envelope behind it starts, whatever the pool size.
//!
//! # Shutdown
//!
//! Shutdown closes intake and the delay queue, then offers one `Terminate` per
//! worker to wake idle workers early. Workers do not depend on those markers:
//! once the pool is shut down a worker drains what is left of the work queue
//! and exits when it finds it empty. Shutdown waits (bounded) for every
//! thread to exit and clears both queues. Envelopes still queued behind a
//! shutdown are counted as dropped.

use crate::application::envelope::{Envelope, SignalKind, SignalWaiter};
use crate::application::error::{BuildError, SinkError};
use crate::application::metrics::{DispatcherStats, DispatcherStatsSnapshot};
use crate::application::ports::{Clock, EventSink};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::delay_queue::DelayQueue;
use crate::infrastructure::diagnostics::RateLimitedReporter;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How often a blocked `put` or an idle worker re-checks for shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatcherConfig {
    /// Pool name, used as the registry key and in diagnostics
    pub name: String,
    /// Number of worker threads
    pub pool_size: usize,
    /// Capacity of the work queue, also the cap of the delay queue
    pub capacity: usize,
    /// Delay before a failed envelope is retried, and the minimum time
    /// between reopen attempts on a failing sink
    pub retry_interval: Duration,
    /// Drop failed envelopes instead of retrying them
    pub drop_on_error: bool,
    /// How long shutdown waits for threads to exit
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            pool_size: 4,
            capacity: 10_000,
            retry_interval: Duration::from_secs(5),
            drop_on_error: false,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DispatcherConfig {
    /// Create a config with default settings and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the number of workers.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Drop failed envelopes instead of retrying them.
    pub fn with_drop_on_error(mut self, drop_on_error: bool) -> Self {
        self.drop_on_error = drop_on_error;
        self
    }

    /// Set the shutdown wait.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Check the settings.
    ///
    /// # Errors
    /// Returns `BuildError::EmptyName`, `BuildError::ZeroPoolSize` or
    /// `BuildError::ZeroCapacity`.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.name.is_empty() {
            return Err(BuildError::EmptyName);
        }
        if self.pool_size == 0 {
            return Err(BuildError::ZeroPoolSize);
        }
        if self.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Barrier guard held while one envelope is processed.
struct Pass<'a> {
    _shared: Option<RwLockReadGuard<'a, ()>>,
    _exclusive: Option<RwLockWriteGuard<'a, ()>>,
}

struct Inner {
    config: DispatcherConfig,
    drop_on_error: AtomicBool,
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    delay: DelayQueue<Envelope>,
    take_lock: Mutex<()>,
    barrier: RwLock<()>,
    started: AtomicBool,
    shut_down: AtomicBool,
    /// Threads still running, workers plus the delay loop
    running: AtomicUsize,
    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: DispatcherStats,
    reporter: RateLimitedReporter,
    clock: Arc<dyn Clock>,
}

/// Worker pool delivering envelopes to sinks.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct PooledDispatcher {
    inner: Arc<Inner>,
}

impl PooledDispatcher {
    /// Create a stopped dispatcher using the system clock.
    ///
    /// # Errors
    /// Returns a `BuildError` if the config is invalid.
    pub fn new(config: DispatcherConfig) -> Result<Self, BuildError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a stopped dispatcher reading time from `clock`.
    ///
    /// `clock` stamps envelopes and measures service time. Reopen throttling
    /// reads the error age from each sink's own clock, and the delay queue
    /// always waits on wall time.
    ///
    /// # Errors
    /// Returns a `BuildError` if the config is invalid.
    pub fn with_clock(config: DispatcherConfig, clock: Arc<dyn Clock>) -> Result<Self, BuildError> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::bounded(config.capacity);
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            inner: Arc::new(Inner {
                drop_on_error: AtomicBool::new(config.drop_on_error),
                config,
                tx,
                rx,
                delay: DelayQueue::new(),
                take_lock: Mutex::new(()),
                barrier: RwLock::new(()),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                running: AtomicUsize::new(0),
                exit_tx,
                exit_rx,
                handles: Mutex::new(Vec::new()),
                stats: DispatcherStats::new(),
                reporter: RateLimitedReporter::default(),
                clock,
            }),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Settings the pool was built with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Spawn the workers and the delay loop. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns `SinkError::ShutDown` after shutdown, or `SinkError::Spawn` if
    /// a thread could not be created. Threads spawned before the failure
    /// keep running until shutdown.
    pub fn start(&self) -> Result<(), SinkError> {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::Acquire) {
            return Err(SinkError::ShutDown {
                pool: inner.config.name.clone(),
            });
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut handles = inner.handles.lock();
        for index in 0..inner.config.pool_size {
            let worker = Arc::clone(inner);
            let handle = Self::spawn(inner, format!("{}-worker-{}", inner.config.name, index), move || {
                worker.run_worker(index)
            })?;
            handles.push(handle);
        }
        let delay_loop = Arc::clone(inner);
        let handle = Self::spawn(inner, format!("{}-delay", inner.config.name), move || {
            delay_loop.run_delay_loop()
        })?;
        handles.push(handle);

        tracing::debug!(
            pool = %inner.config.name,
            workers = inner.config.pool_size,
            capacity = inner.config.capacity,
            "dispatcher started"
        );
        Ok(())
    }

    fn spawn<F>(inner: &Arc<Inner>, thread_name: String, body: F) -> Result<JoinHandle<()>, SinkError>
    where
        F: FnOnce() + Send + 'static,
    {
        inner.running.fetch_add(1, Ordering::AcqRel);
        thread::Builder::new()
            .name(thread_name)
            .spawn(body)
            .map_err(|e| {
                inner.running.fetch_sub(1, Ordering::AcqRel);
                SinkError::Spawn {
                    pool: inner.config.name.clone(),
                    reason: e.to_string(),
                }
            })
    }

    /// Whether `start` has run.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Whether the pool has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Number of threads still running, including the delay loop.
    pub fn running_threads(&self) -> usize {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Enqueue without blocking.
    ///
    /// Returns `false`, counting a drop, if the queue is full or the pool is
    /// shut down.
    pub fn offer(&self, envelope: Envelope) -> bool {
        self.inner.offer(envelope)
    }

    /// Enqueue, blocking while the queue is full.
    ///
    /// # Errors
    /// Returns `SinkError::ShutDown` if the pool is shut down before the call,
    /// or `SinkError::Interrupted` if it shuts down while the call is blocked.
    /// Both count a drop.
    pub fn put(&self, envelope: Envelope) -> Result<(), SinkError> {
        self.inner.put(envelope)
    }

    /// Schedule `envelope` for redelivery after the retry interval.
    ///
    /// Returns `false` if it was discarded: a full delay queue counts a skip,
    /// a shut down pool counts a drop.
    pub fn delay(&self, envelope: Envelope) -> bool {
        self.inner.delay(envelope)
    }

    /// Send a control signal for `sink` through the work queue and wait up to
    /// `timeout` for a worker to execute it.
    ///
    /// Returns `Ok(true)` when acknowledged and `Ok(false)` on timeout.
    ///
    /// # Errors
    /// Returns the error of the signal's effect, or `SinkError::ShutDown` if
    /// the pool no longer accepts signals.
    pub fn signal(
        &self,
        sink: Arc<dyn EventSink>,
        kind: SignalKind,
        timeout: Duration,
    ) -> Result<bool, SinkError> {
        let (waiter, ack) = SignalWaiter::pair();
        let envelope = Envelope::signal(kind, sink, Some(waiter), self.inner.clock.now());
        self.inner.put(envelope)?;

        match ack.wait(timeout) {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    }

    /// Stop the pool. A second call is a no-op.
    ///
    /// `reason` is only logged.
    pub fn shutdown(&self, reason: Option<&SinkError>) {
        let inner = &self.inner;
        if !inner.close_intake(reason) {
            return;
        }
        if !inner.started.load(Ordering::Acquire) {
            inner.clear_queues();
            return;
        }

        inner.send_terminates();

        let expected = inner.config.pool_size + 1;
        let deadline = Instant::now() + inner.config.shutdown_timeout;
        let mut exited = 0;
        while exited < expected && inner.exit_rx.recv_deadline(deadline).is_ok() {
            exited += 1;
        }

        if exited == expected {
            for handle in inner.handles.lock().drain(..) {
                let _ = handle.join();
            }
        } else {
            tracing::warn!(
                pool = %inner.config.name,
                exited,
                expected,
                "shutdown timed out waiting for workers"
            );
        }
        inner.clear_queues();
    }

    /// Toggle dropping of failed envelopes.
    pub fn set_drop_on_error(&self, drop_on_error: bool) {
        self.inner.drop_on_error.store(drop_on_error, Ordering::Relaxed);
    }

    /// Whether failed envelopes are dropped.
    pub fn drop_on_error(&self) -> bool {
        self.inner.drop_on_error.load(Ordering::Relaxed)
    }

    /// Envelopes waiting in the work queue.
    pub fn queue_len(&self) -> usize {
        self.inner.rx.len()
    }

    /// Envelopes waiting for redelivery.
    pub fn delay_len(&self) -> usize {
        self.inner.delay.len()
    }

    /// Work queue capacity.
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Counter handle.
    pub fn counters(&self) -> &DispatcherStats {
        &self.inner.stats
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Flat statistics map, including live queue sizes.
    pub fn stats(&self) -> BTreeMap<String, u64> {
        let mut map = BTreeMap::new();
        self.snapshot().export(&mut map);
        map.insert("pool-queue-size".into(), self.queue_len() as u64);
        map.insert("pool-queue-capacity".into(), self.capacity() as u64);
        map.insert("pool-delay-queue-size".into(), self.delay_len() as u64);
        map.insert("pool-size".into(), self.inner.config.pool_size as u64);
        map
    }

    /// Zero the counters. Queue sizes are live and unaffected.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        self.inner.reporter.reset();
    }
}

impl std::fmt::Debug for PooledDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledDispatcher")
            .field("name", &self.inner.config.name)
            .field("started", &self.is_started())
            .field("shut_down", &self.is_shut_down())
            .field("queue_len", &self.queue_len())
            .field("delay_len", &self.delay_len())
            .finish()
    }
}

impl Inner {
    fn offer(&self, envelope: Envelope) -> bool {
        if self.shut_down.load(Ordering::Acquire) {
            self.stats.record_dropped();
            return false;
        }
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    fn put(&self, mut envelope: Envelope) -> Result<(), SinkError> {
        if self.shut_down.load(Ordering::Acquire) {
            self.stats.record_dropped();
            return Err(SinkError::ShutDown {
                pool: self.config.name.clone(),
            });
        }
        loop {
            match self.tx.send_timeout(envelope, SHUTDOWN_POLL_INTERVAL) {
                Ok(()) if self.shut_down.load(Ordering::Acquire) => {
                    // Shutdown freed the space; the envelope must not outlive it
                    self.clear_queues();
                    return Err(SinkError::Interrupted {
                        pool: self.config.name.clone(),
                    });
                }
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shut_down.load(Ordering::Acquire) {
                        self.stats.record_dropped();
                        return Err(SinkError::Interrupted {
                            pool: self.config.name.clone(),
                        });
                    }
                    envelope = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.stats.record_dropped();
                    return Err(SinkError::Interrupted {
                        pool: self.config.name.clone(),
                    });
                }
            }
        }
    }

    fn delay(&self, envelope: Envelope) -> bool {
        if self.shut_down.load(Ordering::Acquire) {
            self.stats.record_dropped();
            return false;
        }
        if self
            .delay
            .try_push(envelope, self.config.retry_interval, self.config.capacity)
        {
            return true;
        }
        if self.delay.is_closed() {
            self.stats.record_dropped();
        } else {
            self.stats.record_skipped();
        }
        false
    }

    /// Mark the pool closed. Returns `false` if it already was.
    fn close_intake(&self, reason: Option<&SinkError>) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.delay.close();
        match reason {
            Some(reason) => {
                tracing::info!(pool = %self.config.name, reason = %reason, "dispatcher shutting down")
            }
            None => tracing::info!(pool = %self.config.name, "dispatcher shutting down"),
        }
        true
    }

    /// Wake idle workers. A marker that does not fit is not needed: workers
    /// also exit once the pool is shut down and the queue is empty.
    fn send_terminates(&self) {
        for _ in 0..self.config.pool_size {
            if self
                .tx
                .try_send(Envelope::terminate(self.clock.now()))
                .is_err()
            {
                tracing::debug!(pool = %self.config.name, "work queue full, workers exit on drain");
                break;
            }
        }
    }

    /// Discard whatever is left in both queues, counting it as dropped.
    fn clear_queues(&self) {
        let mut discarded = self.delay.clear();
        while let Ok(envelope) = self.rx.try_recv() {
            if envelope.signal_kind() != SignalKind::Terminate {
                discarded += 1;
            }
        }
        for _ in 0..discarded {
            self.stats.record_dropped();
        }
    }

    fn take(&self) -> Option<(Envelope, Pass<'_>)> {
        let _take = self.take_lock.lock();
        let envelope = loop {
            if self.shut_down.load(Ordering::Acquire) {
                break self.rx.try_recv().ok()?;
            }
            match self.rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                Ok(envelope) => break envelope,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        };
        let pass = if envelope.is_signal() {
            Pass {
                _shared: None,
                _exclusive: Some(self.barrier.write()),
            }
        } else {
            Pass {
                _shared: Some(self.barrier.read()),
                _exclusive: None,
            }
        };
        Some((envelope, pass))
    }

    fn run_worker(self: Arc<Self>, index: usize) {
        tracing::debug!(pool = %self.config.name, worker = index, "worker started");

        while let Some((mut envelope, pass)) = self.take() {
            match envelope.signal_kind() {
                SignalKind::Terminate => break,
                SignalKind::None => self.deliver(envelope),
                kind => {
                    let waiter = envelope.take_waiter();
                    let result = self.execute_signal(&envelope, kind);
                    self.stats.record_signal();
                    let stopping = kind == SignalKind::Shutdown && self.close_intake(None);
                    if let Some(waiter) = waiter {
                        waiter.notify(result);
                    }
                    // Terminates go out after the barrier is released so the
                    // other workers can drain the queue meanwhile
                    drop(pass);
                    if stopping {
                        self.send_terminates();
                    }
                    continue;
                }
            }
            drop(pass);
        }

        tracing::debug!(pool = %self.config.name, worker = index, "worker exited");
        self.thread_exited();
    }

    fn run_delay_loop(self: Arc<Self>) {
        while let Some(envelope) = self.delay.take() {
            if self.shut_down.load(Ordering::Acquire) {
                self.stats.record_dropped();
                continue;
            }
            self.stats.record_requeued();
            self.offer(envelope);
        }
        tracing::debug!(pool = %self.config.name, "delay loop exited");
        self.thread_exited();
    }

    fn thread_exited(&self) {
        let _ = self.exit_tx.send(());
        let remaining = self.running.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.shut_down.load(Ordering::Acquire) {
            self.clear_queues();
        }
    }

    fn execute_signal(&self, envelope: &Envelope, kind: SignalKind) -> Result<(), SinkError> {
        let sink = envelope.sink().ok_or(SinkError::NoTarget)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
            SignalKind::Flush => sink.flush(),
            SignalKind::Close | SignalKind::Shutdown => sink.close(),
            SignalKind::None | SignalKind::Terminate => Ok(()),
        }));
        outcome.unwrap_or_else(|_| {
            Err(SinkError::Close {
                sink: sink.name().to_string(),
                reason: format!("sink panicked during {}", kind),
            })
        })
    }

    fn deliver(&self, envelope: Envelope) {
        if self.shut_down.load(Ordering::Acquire) {
            self.stats.record_dropped();
            return;
        }
        self.stats.record_taken();

        let (Some(sink), Some(payload)) = (envelope.sink().cloned(), envelope.payload().cloned())
        else {
            self.stats.record_skipped();
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.ensure_ready(&sink)?;
            sink.log(payload)
        }));
        let result = outcome.unwrap_or_else(|_| {
            Err(SinkError::Write {
                sink: sink.name().to_string(),
                reason: "sink panicked".to_string(),
            })
        });

        match result {
            Ok(()) => {
                let service_time = self.clock.now().saturating_duration_since(envelope.created());
                self.stats.record_logged(service_time);
            }
            Err(error) => self.handle_failure(envelope, &sink, error),
        }
    }

    /// Open the sink if needed, throttling reopen attempts while it is failing.
    fn ensure_ready(&self, sink: &Arc<dyn EventSink>) -> Result<(), SinkError> {
        let latched = sink.error_state();
        if sink.is_open() && latched.is_none() {
            return Ok(());
        }

        if let (Some(error), Some(age)) = (&latched, sink.error_age()) {
            if age < self.config.retry_interval {
                return Err(SinkError::NotReady {
                    sink: sink.name().to_string(),
                    reason: error.to_string(),
                });
            }
        }

        if sink.is_open() {
            sink.reopen()?;
        } else {
            sink.open()?;
        }

        if latched.is_some() {
            sink.set_error_state(None);
            self.stats.record_recovery();
            tracing::info!(pool = %self.config.name, sink = %sink.name(), "sink recovered");
        }
        Ok(())
    }

    fn handle_failure(&self, mut envelope: Envelope, sink: &Arc<dyn EventSink>, error: SinkError) {
        self.stats.record_exception();
        self.reporter.report(&self.config.name, sink.name(), error.root());

        if sink.error_state().is_none() {
            sink.set_error_state(Some(error.root().clone()));
        }
        envelope.record_failure(error.root().clone());

        // A listener on the sink already took the envelope
        if error.is_handled() {
            return;
        }
        if self.drop_on_error.load(Ordering::Relaxed) {
            self.stats.record_dropped();
            return;
        }
        self.delay(envelope);
    }
}
