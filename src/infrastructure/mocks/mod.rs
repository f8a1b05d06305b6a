//! Mock implementations for testing.
//!
//! Test doubles for the clock, the tracing subscriber and downstream sinks,
//! so dispatcher and front-end behavior can be tested without real I/O.

pub mod clock;
pub mod layer;
pub mod recording;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use recording::{RecordingSink, SinkCall};
