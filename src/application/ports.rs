//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters and user code implement these ports:
//! transports implement [`SinkWriter`], anything the pipeline can deliver to
//! implements [`EventSink`].

use crate::application::error::{SinkError, WriteError};
use crate::domain::payload::{Activity, Message, Payload, Snapshot, TrackingEvent};
use crate::domain::severity::Severity;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for the transport behind a managed sink.
///
/// A concrete sink (file, socket, broadcast, discard) only implements the
/// actual I/O; lifecycle bookkeeping, filtering, statistics and rate limiting
/// are provided by [`ManagedSink`](crate::application::sink::ManagedSink).
///
/// Workers may call the write methods concurrently, so implementations must be
/// safe under concurrent use or serialize internally.
pub trait SinkWriter: Send + Sync + Debug {
    /// Acquire the underlying resource.
    fn open(&self) -> Result<(), WriteError> {
        Ok(())
    }

    /// Release the underlying resource.
    fn close(&self) -> Result<(), WriteError> {
        Ok(())
    }

    /// Push buffered output to its destination.
    fn flush(&self) -> Result<(), WriteError> {
        Ok(())
    }

    /// Write a tracking event.
    fn write_event(&self, event: &TrackingEvent) -> Result<(), WriteError>;

    /// Write an activity.
    fn write_activity(&self, activity: &Activity) -> Result<(), WriteError>;

    /// Write a snapshot.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), WriteError>;

    /// Write a plain message.
    fn write_message(&self, message: &Message) -> Result<(), WriteError>;
}

/// Port for anything the pipeline can deliver to.
///
/// This is both the producer-facing contract (`log_*`, `write`) and the
/// minimal contract the dispatcher requires of a downstream sink (lifecycle,
/// error state and one typed log call per payload kind).
pub trait EventSink: Send + Sync + Debug {
    /// Name used in errors, diagnostics and statistics.
    fn name(&self) -> &str;

    /// Open the sink. Opening an open sink is a no-op.
    fn open(&self) -> Result<(), SinkError>;

    /// Close the sink. Closing a closed sink is a no-op.
    fn close(&self) -> Result<(), SinkError>;

    /// Close then open.
    fn reopen(&self) -> Result<(), SinkError> {
        self.close()?;
        self.open()
    }

    /// Whether the sink is open.
    fn is_open(&self) -> bool;

    /// Flush buffered output.
    fn flush(&self) -> Result<(), SinkError>;

    /// The latched error, if the sink is in error state.
    fn error_state(&self) -> Option<SinkError>;

    /// Latch (`Some`) or clear (`None`) the error state.
    fn set_error_state(&self, error: Option<SinkError>);

    /// When the last error was latched.
    fn last_error_time(&self) -> Option<Instant>;

    /// Time since the last error, measured on the sink's own clock.
    fn error_age(&self) -> Option<Duration>;

    /// Whether the payload passes the severity gate and every filter.
    ///
    /// A rejection counts one skip in this sink's statistics.
    fn is_loggable(&self, payload: &Payload) -> bool;

    /// Same check as [`is_loggable`](EventSink::is_loggable) without counting
    /// a skip. A front-end uses it so the skip lands in its own statistics.
    fn accepts(&self, payload: &Payload) -> bool {
        self.is_loggable(payload)
    }

    /// Log one payload.
    fn log(&self, payload: Payload) -> Result<(), SinkError>;

    /// Log a tracking event.
    fn log_event(&self, event: TrackingEvent) -> Result<(), SinkError> {
        self.log(event.into())
    }

    /// Log an activity.
    fn log_activity(&self, activity: Activity) -> Result<(), SinkError> {
        self.log(activity.into())
    }

    /// Log a snapshot.
    fn log_snapshot(&self, snapshot: Snapshot) -> Result<(), SinkError> {
        self.log(snapshot.into())
    }

    /// Log a message at the given severity.
    fn log_message(
        &self,
        severity: Severity,
        text: &str,
        args: Vec<String>,
    ) -> Result<(), SinkError> {
        self.log(Message::new(severity, text, args).into())
    }

    /// Write a message at `Info` severity.
    fn write(&self, text: &str, args: Vec<String>) -> Result<(), SinkError> {
        self.log_message(Severity::Info, text, args)
    }

    /// Whether `log` re-checks [`is_loggable`](EventSink::is_loggable).
    fn filter_on_log(&self) -> bool {
        true
    }

    /// Enable or disable filtering inside `log`.
    fn set_filter_on_log(&self, _enabled: bool) {}

    /// Register a listener for write failures.
    fn add_error_listener(&self, _listener: Arc<dyn SinkErrorListener>) {}

    /// Remove a previously registered error listener.
    fn remove_error_listener(&self, _listener: &Arc<dyn SinkErrorListener>) {}

    /// Flat statistics map.
    fn stats(&self) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }
}

/// Port for per-item filtering.
pub trait SinkEventFilter: Send + Sync {
    /// Return `false` to reject the payload.
    fn accept(&self, sink: &str, payload: &Payload) -> bool;
}

/// Failure notification handed to error listeners.
#[derive(Debug, Clone, Copy)]
pub struct SinkErrorEvent<'a> {
    /// Name of the failing sink
    pub sink: &'a str,
    /// The failure
    pub error: &'a SinkError,
    /// The payload that failed, when the failure happened during a write
    pub payload: Option<&'a Payload>,
}

/// Port for reacting to sink failures.
pub trait SinkErrorListener: Send + Sync {
    /// Called after the sink latched `event.error`.
    fn sink_error(&self, event: &SinkErrorEvent<'_>);
}

/// Completed write handed to log listeners.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRecord<'a> {
    /// Name of the sink that wrote the payload
    pub sink: &'a str,
    /// The written payload
    pub payload: &'a Payload,
    /// When the write finished
    pub completed_at: Instant,
}

/// Port for observing successful writes.
pub trait SinkLogListener: Send + Sync {
    /// Called after each successful write.
    fn sink_logged(&self, record: &CompletedRecord<'_>);
}

/// Port for the fallback error channel.
///
/// Used when a sink fails and nobody listens, so the error is never lost.
pub trait DiagnosticSink: Send + Sync + Debug {
    /// Report an error that no listener received.
    fn report(&self, sink: &str, error: &SinkError);
}
