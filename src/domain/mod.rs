//! Domain layer - pure value types with no knowledge of threads or sinks.
//!
//! This layer contains:
//! - Severity levels
//! - Payload records moved through the pipeline
//! - The delayed element used to schedule retries
//! - Token bucket arithmetic used by the rate limiter
//!
//! Everything here is deterministic and takes time as an explicit argument.

pub mod bucket;
pub mod delayed;
pub mod payload;
pub mod severity;
