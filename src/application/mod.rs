//! Application layer - the delivery pipeline.
//!
//! This layer moves payloads from producers to downstream sinks:
//! - Managed sink (lifecycle, filtering, statistics, rate limiting)
//! - Pooled dispatcher (bounded queue, worker pool, delay queue, signals)
//! - Buffering front-end and its factory
//! - Named dispatcher registry
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters and user code implement. This keeps the pipeline independent
//! from any particular transport.

pub mod buffered;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod error_state;
pub mod factory;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sink;
