//! Work envelopes and the signal protocol.
//!
//! Data and control travel through the same queue. A signal is therefore
//! processed after every envelope enqueued before it and before any enqueued
//! after it. The issuing caller waits on a capacity-1 channel owned by the
//! signal envelope; the worker sends the effect's result once it is done.

use crate::application::error::SinkError;
use crate::application::ports::EventSink;
use crate::domain::payload::{Payload, Ttl};
use crate::domain::severity::Severity;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Control action carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalKind {
    /// Ordinary data
    #[default]
    None,
    /// Flush the target sink
    Flush,
    /// Close the target sink
    Close,
    /// Close the target sink and shut the dispatcher down
    Shutdown,
    /// Stop the receiving worker; no sink operation
    Terminate,
}

impl SignalKind {
    /// Get the signal name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::None => "none",
            SignalKind::Flush => "flush",
            SignalKind::Close => "close",
            SignalKind::Shutdown => "shutdown",
            SignalKind::Terminate => "terminate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sending half of a signal acknowledgement.
#[derive(Debug)]
pub struct SignalWaiter {
    tx: Sender<Result<(), SinkError>>,
}

/// Receiving half of a signal acknowledgement, held by the issuing caller.
#[derive(Debug)]
pub struct SignalAck {
    rx: Receiver<Result<(), SinkError>>,
}

impl SignalWaiter {
    /// Create a connected waiter/acknowledgement pair.
    pub fn pair() -> (SignalWaiter, SignalAck) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (SignalWaiter { tx }, SignalAck { rx })
    }

    /// Wake the caller with the outcome of the signal.
    ///
    /// A caller that already gave up is ignored.
    pub fn notify(self, result: Result<(), SinkError>) {
        let _ = self.tx.try_send(result);
    }
}

impl SignalAck {
    /// Wait up to `timeout` for the worker.
    ///
    /// Returns `None` on timeout, or when the envelope was discarded without
    /// being processed.
    pub fn wait(&self, timeout: Duration) -> Option<Result<(), SinkError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Unit of work moving through the dispatcher queues.
pub struct Envelope {
    payload: Option<Payload>,
    sink: Option<Arc<dyn EventSink>>,
    severity: Severity,
    ttl: Ttl,
    created: Instant,
    signal: SignalKind,
    waiter: Option<SignalWaiter>,
    last_error: Option<SinkError>,
    failures: u32,
}

impl Envelope {
    /// Wrap a payload for delivery to `sink`.
    pub fn data(sink: Arc<dyn EventSink>, payload: Payload, created: Instant) -> Self {
        Self {
            severity: payload.severity(),
            ttl: payload.ttl(),
            payload: Some(payload),
            sink: Some(sink),
            created,
            signal: SignalKind::None,
            waiter: None,
            last_error: None,
            failures: 0,
        }
    }

    /// Build a signal for `sink`, acknowledged through `waiter` if given.
    pub fn signal(
        kind: SignalKind,
        sink: Arc<dyn EventSink>,
        waiter: Option<SignalWaiter>,
        created: Instant,
    ) -> Self {
        Self {
            payload: None,
            sink: Some(sink),
            severity: Severity::None,
            ttl: Ttl::Inherit,
            created,
            signal: kind,
            waiter,
            last_error: None,
            failures: 0,
        }
    }

    /// Build a worker stop marker.
    pub fn terminate(created: Instant) -> Self {
        Self {
            payload: None,
            sink: None,
            severity: Severity::None,
            ttl: Ttl::Inherit,
            created,
            signal: SignalKind::Terminate,
            waiter: None,
            last_error: None,
            failures: 0,
        }
    }

    /// The payload, absent for signals.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// The target sink.
    pub fn sink(&self) -> Option<&Arc<dyn EventSink>> {
        self.sink.as_ref()
    }

    /// Severity of the payload.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// TTL of the payload at enqueue time.
    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// When the envelope was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// The control action, `SignalKind::None` for data.
    pub fn signal_kind(&self) -> SignalKind {
        self.signal
    }

    /// Whether this envelope carries a control action.
    pub fn is_signal(&self) -> bool {
        self.signal != SignalKind::None
    }

    /// Take the acknowledgement sender, leaving none behind.
    pub fn take_waiter(&mut self) -> Option<SignalWaiter> {
        self.waiter.take()
    }

    /// Note a failed delivery attempt.
    pub fn record_failure(&mut self, error: SinkError) {
        self.failures = self.failures.saturating_add(1);
        self.last_error = Some(error);
    }

    /// Builder form of [`record_failure`](Envelope::record_failure).
    pub fn with_failure(mut self, error: SinkError) -> Self {
        self.record_failure(error);
        self
    }

    /// Error of the most recent failed attempt.
    pub fn last_error(&self) -> Option<&SinkError> {
        self.last_error.as_ref()
    }

    /// Number of failed attempts so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("signal", &self.signal)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .field("kind", &self.payload.as_ref().map(|p| p.kind()))
            .field("severity", &self.severity)
            .field("failures", &self.failures)
            .finish()
    }
}
