//! Ready-made [`SinkWriter`] transports.

use crate::application::error::WriteError;
use crate::application::ports::SinkWriter;
use crate::domain::payload::{Activity, Message, Snapshot, TrackingEvent};
use crate::domain::severity::Severity;
use std::sync::atomic::{AtomicU64, Ordering};

/// Discards everything, counting what it was given.
#[derive(Debug, Default)]
pub struct NullWriter {
    discarded: AtomicU64,
}

impl NullWriter {
    /// Create a discarding writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items discarded.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn discard(&self) -> Result<(), WriteError> {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl SinkWriter for NullWriter {
    fn write_event(&self, _event: &TrackingEvent) -> Result<(), WriteError> {
        self.discard()
    }

    fn write_activity(&self, _activity: &Activity) -> Result<(), WriteError> {
        self.discard()
    }

    fn write_snapshot(&self, _snapshot: &Snapshot) -> Result<(), WriteError> {
        self.discard()
    }

    fn write_message(&self, _message: &Message) -> Result<(), WriteError> {
        self.discard()
    }
}

/// Emits each item as a `tracing` event under the `sink_relay::output` target.
///
/// Severities map onto tracing levels: `Trace`/`Debug`/`Info` keep their
/// level, `Notice` logs as info, `Warning` as warn, everything from `Error`
/// up as error.
#[derive(Debug, Clone, Default)]
pub struct TracingWriter {
    source: String,
}

macro_rules! emit {
    ($severity:expr, $($field:tt)+) => {
        match $severity {
            Severity::None | Severity::Trace => {
                tracing::trace!(target: "sink_relay::output", $($field)+)
            }
            Severity::Debug => tracing::debug!(target: "sink_relay::output", $($field)+),
            Severity::Info | Severity::Notice => {
                tracing::info!(target: "sink_relay::output", $($field)+)
            }
            Severity::Warning => tracing::warn!(target: "sink_relay::output", $($field)+),
            _ => tracing::error!(target: "sink_relay::output", $($field)+),
        }
    };
}

impl TracingWriter {
    /// Create a writer tagging every event with `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl SinkWriter for TracingWriter {
    fn write_event(&self, event: &TrackingEvent) -> Result<(), WriteError> {
        emit!(
            event.severity,
            source = %self.source,
            tracking_id = %event.tracking_id,
            name = %event.name,
            severity = %event.severity,
            "{}",
            event.message
        );
        Ok(())
    }

    fn write_activity(&self, activity: &Activity) -> Result<(), WriteError> {
        emit!(
            activity.severity,
            source = %self.source,
            id = %activity.id,
            events = activity.event_count as u64,
            severity = %activity.severity,
            "activity {}",
            activity.name
        );
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), WriteError> {
        emit!(
            snapshot.severity,
            source = %self.source,
            category = %snapshot.category,
            properties = ?snapshot.properties,
            severity = %snapshot.severity,
            "snapshot {}",
            snapshot.name
        );
        Ok(())
    }

    fn write_message(&self, message: &Message) -> Result<(), WriteError> {
        emit!(
            message.severity,
            source = %self.source,
            severity = %message.severity,
            "{}",
            message.formatted()
        );
        Ok(())
    }
}
