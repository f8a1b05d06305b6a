//! Recording sink for testing.

use crate::application::error::SinkError;
use crate::application::error_state::ErrorLatch;
use crate::application::ports::{EventSink, SinkErrorEvent, SinkErrorListener};
use crate::domain::payload::Payload;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One call observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Open,
    Close,
    Flush,
    /// A successful write, labelled by the payload's tracking id, its
    /// formatted text for messages, or its kind otherwise
    Log(String),
}

/// In-memory sink that records the order of calls and can be told to fail.
///
/// Failures behave like a managed sink's: the error is latched, listeners are
/// notified with the payload, and the returned error is marked handled when at
/// least one listener received it.
pub struct RecordingSink {
    name: String,
    open: AtomicBool,
    filter_on_log: AtomicBool,
    reject_all: AtomicBool,
    calls: Mutex<Vec<SinkCall>>,
    failures: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
    listeners: RwLock<Vec<Arc<dyn SinkErrorListener>>>,
    latch: ErrorLatch,
}

impl RecordingSink {
    /// Create a closed sink.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
            filter_on_log: AtomicBool::new(true),
            reject_all: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            latch: ErrorLatch::new(Instant::now()),
        }
    }

    /// Fail the next `times` writes of the payload labelled `label`.
    pub fn fail_writes(&self, label: impl Into<String>, times: usize) {
        self.failures.lock().insert(label.into(), times);
    }

    /// Make `is_loggable` reject everything.
    pub fn reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::Relaxed);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Labels of the payloads written successfully, in order.
    pub fn logged_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Log(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of write attempts, failed or not, for `label`.
    pub fn write_attempts(&self, label: &str) -> usize {
        self.attempts.lock().get(label).copied().unwrap_or(0)
    }

    /// Number of registered error listeners.
    pub fn error_listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn label(payload: &Payload) -> String {
        match (payload.tracking_id(), payload) {
            (Some(id), _) => id.to_string(),
            (None, Payload::Message(message)) => message.formatted(),
            (None, other) => other.kind().as_str().to_string(),
        }
    }

    fn should_fail(&self, label: &str) -> bool {
        *self.attempts.lock().entry(label.to_string()).or_insert(0) += 1;
        match self.failures.lock().get_mut(label) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSink")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), SinkError> {
        if !self.open.swap(true, Ordering::AcqRel) {
            self.calls.lock().push(SinkCall::Open);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.calls.lock().push(SinkCall::Close);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.calls.lock().push(SinkCall::Flush);
        Ok(())
    }

    fn error_state(&self) -> Option<SinkError> {
        self.latch.current()
    }

    fn set_error_state(&self, error: Option<SinkError>) {
        match error {
            Some(error) => self.latch.set(error, Instant::now()),
            None => self.latch.clear(),
        }
    }

    fn last_error_time(&self) -> Option<Instant> {
        self.latch.last_error_time()
    }

    fn error_age(&self) -> Option<Duration> {
        self.latch.last_error_time().map(|at| at.elapsed())
    }

    fn is_loggable(&self, _payload: &Payload) -> bool {
        !self.reject_all.load(Ordering::Relaxed)
    }

    fn log(&self, payload: Payload) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::NotOpen {
                sink: self.name.clone(),
            });
        }

        let label = Self::label(&payload);
        if !self.should_fail(&label) {
            self.latch.clear();
            self.calls.lock().push(SinkCall::Log(label));
            return Ok(());
        }

        let error = SinkError::Write {
            sink: self.name.clone(),
            reason: format!("scripted failure for '{}'", label),
        };
        self.latch.set(error.clone(), Instant::now());

        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return Err(error);
        }
        let event = SinkErrorEvent {
            sink: &self.name,
            error: &error,
            payload: Some(&payload),
        };
        for listener in &listeners {
            listener.sink_error(&event);
        }
        Err(SinkError::Handled(Box::new(error)))
    }

    fn filter_on_log(&self) -> bool {
        self.filter_on_log.load(Ordering::Relaxed)
    }

    fn set_filter_on_log(&self, enabled: bool) {
        self.filter_on_log.store(enabled, Ordering::Relaxed);
    }

    fn add_error_listener(&self, listener: Arc<dyn SinkErrorListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_error_listener(&self, listener: &Arc<dyn SinkErrorListener>) {
        self.listeners
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }
}
