//! Payload records carried through the pipeline.
//!
//! Building a fully timestamped, correlated record and rendering it are the
//! caller's business. The pipeline only needs the minimal shapes defined here:
//! something with a severity, a time-to-live and a size estimate.

use crate::domain::severity::Severity;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Size estimate used for activities and snapshots when consulting the limiter.
pub const DEFAULT_ITEM_SIZE: usize = 64;

/// Time-to-live of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ttl {
    /// Keep whatever the item already carries
    #[default]
    Inherit,
    /// Never expires
    Forever,
    /// Expires after the given number of seconds
    Seconds(u64),
}

/// A single tracking event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEvent {
    /// Correlation id of the event
    pub tracking_id: String,
    /// Operation name
    pub name: String,
    /// Event severity
    pub severity: Severity,
    /// Human readable message
    pub message: String,
    /// Time-to-live
    pub ttl: Ttl,
    /// Rendered size, when the producer knows it
    pub size_hint: Option<usize>,
}

impl TrackingEvent {
    /// Create an event with `Info` severity and no message.
    pub fn new(tracking_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            name: name.into(),
            severity: Severity::Info,
            message: String::new(),
            ttl: Ttl::Inherit,
            size_hint: None,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the rendered size hint.
    pub fn with_size_hint(mut self, size: usize) -> Self {
        self.size_hint = Some(size);
        self
    }
}

/// A unit of work grouping events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    /// Activity id
    pub id: String,
    /// Activity name
    pub name: String,
    /// Activity severity
    pub severity: Severity,
    /// Time-to-live
    pub ttl: Ttl,
    /// Number of events recorded under the activity
    pub event_count: usize,
}

impl Activity {
    /// Create an activity with `Info` severity.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            severity: Severity::Info,
            ttl: Ttl::Inherit,
            event_count: 0,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the number of events.
    pub fn with_event_count(mut self, count: usize) -> Self {
        self.event_count = count;
        self
    }
}

/// A named set of properties captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Snapshot name
    pub name: String,
    /// Snapshot category
    pub category: String,
    /// Snapshot severity
    pub severity: Severity,
    /// Time-to-live
    pub ttl: Ttl,
    /// Captured properties
    pub properties: BTreeMap<String, String>,
}

impl Snapshot {
    /// Create an empty snapshot with `Info` severity.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            severity: Severity::Info,
            ttl: Ttl::Inherit,
            properties: BTreeMap::new(),
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A plain message with positional arguments.
///
/// Each `{}` in the text is replaced by the next argument when formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message severity
    pub severity: Severity,
    /// Message template
    pub text: String,
    /// Positional arguments
    pub args: Vec<String>,
    /// Time-to-live
    pub ttl: Ttl,
}

impl Message {
    /// Create a message.
    pub fn new(severity: Severity, text: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            args,
            ttl: Ttl::Inherit,
        }
    }

    /// Substitute the arguments into the template.
    pub fn formatted(&self) -> String {
        if self.args.is_empty() {
            return self.text.clone();
        }
        let mut out = String::with_capacity(self.text.len() + 16 * self.args.len());
        let mut args = self.args.iter();
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => out.push_str(arg),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Kind of payload, used for per-kind counters and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A tracking event
    Event,
    /// An activity
    Activity,
    /// A snapshot
    Snapshot,
    /// A plain message
    Message,
}

impl PayloadKind {
    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Event => "event",
            PayloadKind::Activity => "activity",
            PayloadKind::Snapshot => "snapshot",
            PayloadKind::Message => "message",
        }
    }
}

/// One item to be written by a sink.
///
/// Cloning is cheap: the records are shared behind `Arc`, so a retry or a
/// listener notification never copies the record itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A tracking event
    Event(Arc<TrackingEvent>),
    /// An activity
    Activity(Arc<Activity>),
    /// A snapshot
    Snapshot(Arc<Snapshot>),
    /// A plain message
    Message(Arc<Message>),
}

impl Payload {
    /// Kind of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Event(_) => PayloadKind::Event,
            Payload::Activity(_) => PayloadKind::Activity,
            Payload::Snapshot(_) => PayloadKind::Snapshot,
            Payload::Message(_) => PayloadKind::Message,
        }
    }

    /// Severity of the wrapped record.
    pub fn severity(&self) -> Severity {
        match self {
            Payload::Event(e) => e.severity,
            Payload::Activity(a) => a.severity,
            Payload::Snapshot(s) => s.severity,
            Payload::Message(m) => m.severity,
        }
    }

    /// Time-to-live of the wrapped record.
    pub fn ttl(&self) -> Ttl {
        match self {
            Payload::Event(e) => e.ttl,
            Payload::Activity(a) => a.ttl,
            Payload::Snapshot(s) => s.ttl,
            Payload::Message(m) => m.ttl,
        }
    }

    /// Return the payload with its time-to-live replaced.
    ///
    /// The record is copied only if it is shared with another holder.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        match &mut self {
            Payload::Event(e) => Arc::make_mut(e).ttl = ttl,
            Payload::Activity(a) => Arc::make_mut(a).ttl = ttl,
            Payload::Snapshot(s) => Arc::make_mut(s).ttl = ttl,
            Payload::Message(m) => Arc::make_mut(m).ttl = ttl,
        }
        self
    }

    /// Size estimate handed to the rate limiter.
    pub fn estimated_size(&self) -> usize {
        match self {
            Payload::Event(e) => e.size_hint.unwrap_or(e.message.len()),
            Payload::Activity(_) | Payload::Snapshot(_) => DEFAULT_ITEM_SIZE,
            Payload::Message(m) => m.formatted().len(),
        }
    }

    /// Correlation id, for kinds that have one.
    pub fn tracking_id(&self) -> Option<&str> {
        match self {
            Payload::Event(e) => Some(&e.tracking_id),
            Payload::Activity(a) => Some(&a.id),
            Payload::Snapshot(_) | Payload::Message(_) => None,
        }
    }
}

impl From<TrackingEvent> for Payload {
    fn from(event: TrackingEvent) -> Self {
        Payload::Event(Arc::new(event))
    }
}

impl From<Activity> for Payload {
    fn from(activity: Activity) -> Self {
        Payload::Activity(Arc::new(activity))
    }
}

impl From<Snapshot> for Payload {
    fn from(snapshot: Snapshot) -> Self {
        Payload::Snapshot(Arc::new(snapshot))
    }
}

impl From<Message> for Payload {
    fn from(message: Message) -> Self {
        Payload::Message(Arc::new(message))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Event(e) => write!(f, "event[{}] {}: {}", e.tracking_id, e.name, e.message),
            Payload::Activity(a) => write!(f, "activity[{}] {}", a.id, a.name),
            Payload::Snapshot(s) => write!(f, "snapshot {}@{}", s.name, s.category),
            Payload::Message(m) => f.write_str(&m.formatted()),
        }
    }
}
