//! # sink-relay
//!
//! Asynchronous delivery pipeline for application instrumentation.
//!
//! Producers hand tracking events, activities, snapshots and plain messages to
//! a sink. This crate sits between the producers and a possibly slow or
//! unreliable transport: a bounded queue absorbs bursts, a fixed pool of
//! worker threads writes to the transport, failed writes are retried after a
//! delay, and flush/close travel through the same queue as the data so they
//! act as a barrier.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sink_relay::{
//!     BufferedSink, DispatcherConfig, DispatcherRegistry, EventSink, ManagedSink, Severity,
//! };
//! use sink_relay::domain::payload::TrackingEvent;
//! use sink_relay::infrastructure::writers::TracingWriter;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // The transport only implements the writes; the managed sink adds
//! // lifecycle, filtering, statistics and rate limiting.
//! let downstream = ManagedSink::builder()
//!     .with_name("audit")
//!     .with_writer(TracingWriter::new("billing"))
//!     .with_min_severity(Severity::Info)
//!     .build()
//!     .unwrap();
//!
//! // Pools are named and shared through an explicit registry.
//! let registry = DispatcherRegistry::new();
//! let pool = registry
//!     .get_or_start(
//!         DispatcherConfig::new("io")
//!             .with_pool_size(2)
//!             .with_capacity(1_000)
//!             .with_retry_interval(Duration::from_secs(1)),
//!     )
//!     .unwrap();
//!
//! let sink = BufferedSink::builder()
//!     .with_sink(Arc::new(downstream))
//!     .with_dispatcher(pool)
//!     .build()
//!     .unwrap();
//!
//! sink.open().unwrap();
//! sink.log_event(TrackingEvent::new("order-17", "charge").with_message("card accepted"))
//!     .unwrap();
//! sink.flush().unwrap(); // returns once everything logged before it is written
//!
//! registry.shutdown_all(None);
//! ```
//!
//! ## Features
//!
//! ### Backpressure
//! - **Non-blocking** (default): a full queue drops the item and counts it
//! - **Blocking**: `with_block_on_full(true)` parks the producer until space
//!   frees up; shutdown interrupts the wait with an error
//!
//! ### Failure Handling
//! - A failed write latches the sink's error state and the envelope is
//!   retried after the pool's retry interval
//! - Reopen attempts on a failing sink are throttled to one per interval
//! - `with_drop_on_error(true)` drops failed envelopes instead
//! - Delivery failures are reported through `tracing` at most once per
//!   interval, with a count of the reports that were held back
//!
//! ### Rate Limiting
//! - Per-sink messages/second and bytes/second ceilings
//!   ([`EventLimiter`]), blocking or with a bounded wait
//!
//! ### Signals
//! - `flush`, `close` and `shutdown` are queued behind every item submitted
//!   before them and acknowledged by the worker that runs them, within a
//!   configurable timeout
//!
//! ## Observability
//!
//! Every component exports a flat map of stable counter names:
//!
//! ```rust,no_run
//! # use sink_relay::{BufferedSink, EventSink};
//! # fn report(sink: &BufferedSink) {
//! let stats = sink.stats();
//! println!("logged:     {}", stats["pool-logged"]);
//! println!("dropped:    {}", stats["pool-dropped"] + stats["buffer-dropped"]);
//! println!("exceptions: {}", stats["pool-exceptions"]);
//! println!("queue:      {}/{}", stats["pool-queue-size"], stats["pool-queue-capacity"]);
//! # }
//! ```
//!
//! Reading the map never blocks producers. Counters are read one by one, so a
//! map taken under load is not an atomic snapshot of the whole pipeline.
//!
//! ## Delivery Guarantees
//!
//! Delivery is at-most-once with explicit retry. Order is preserved per
//! producer on the way into the queue, but not across workers or across a
//! retry. Under sustained overload items are dropped, and every drop is
//! counted.

// Domain layer - value types
pub mod domain;

// Application layer - the pipeline
pub mod application;

// Infrastructure layer - adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    payload::{Activity, Message, Payload, PayloadKind, Snapshot, TrackingEvent, Ttl},
    severity::Severity,
};

pub use application::{
    buffered::{BufferedConfig, BufferedSink, BufferedSinkBuilder},
    dispatcher::{DispatcherConfig, PooledDispatcher},
    envelope::{Envelope, SignalKind},
    error::{BuildError, SinkError, WriteError},
    factory::{BufferedSinkFactory, BufferedSinkFactoryBuilder},
    limiter::{EventLimiter, LimiterConfig, LimiterMode, LimiterSnapshot},
    metrics::{BufferStats, DispatcherStats, DispatcherStatsSnapshot, SinkStats, SinkStatsSnapshot},
    ports::{
        Clock, CompletedRecord, DiagnosticSink, EventSink, SinkErrorEvent, SinkErrorListener,
        SinkEventFilter, SinkLogListener, SinkWriter,
    },
    registry::DispatcherRegistry,
    sink::{ManagedSink, ManagedSinkBuilder},
};

pub use infrastructure::{
    clock::SystemClock,
    diagnostics::{RateLimitedReporter, TracingDiagnostics},
    filters::{FnFilter, SeverityFilter},
    writers::{NullWriter, TracingWriter},
};
