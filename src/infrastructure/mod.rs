//! Infrastructure layer - adapters around the pipeline.
//!
//! This layer provides:
//! - Clock abstraction (system time vs mock)
//! - The time-ordered delay queue used for retries
//! - Diagnostics (default error channel, rate-limited failure reports)
//! - Ready-made writers and filters

pub mod clock;
pub mod delay_queue;
pub mod diagnostics;
pub mod filters;
pub mod writers;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. To use these mocks in integration tests, add to
/// your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// sink-relay = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
