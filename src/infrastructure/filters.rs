//! Ready-made [`SinkEventFilter`]s.

use crate::application::ports::SinkEventFilter;
use crate::domain::payload::{Payload, PayloadKind};
use crate::domain::severity::Severity;
use std::fmt;

/// Accepts items at or above a severity, optionally for some kinds only.
#[derive(Debug, Clone)]
pub struct SeverityFilter {
    min_severity: Severity,
    kinds: Option<Vec<PayloadKind>>,
}

impl SeverityFilter {
    /// Accept every kind at or above `min_severity`.
    pub fn new(min_severity: Severity) -> Self {
        Self {
            min_severity,
            kinds: None,
        }
    }

    /// Apply the threshold to these kinds only; other kinds always pass.
    pub fn for_kinds(mut self, kinds: Vec<PayloadKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }
}

impl SinkEventFilter for SeverityFilter {
    fn accept(&self, _sink: &str, payload: &Payload) -> bool {
        let applies = self
            .kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&payload.kind()));
        !applies || payload.severity() >= self.min_severity
    }
}

/// Filter backed by a closure receiving the sink name and the payload.
pub struct FnFilter<F> {
    predicate: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&str, &Payload) -> bool + Send + Sync,
{
    /// Wrap `predicate`.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> SinkEventFilter for FnFilter<F>
where
    F: Fn(&str, &Payload) -> bool + Send + Sync,
{
    fn accept(&self, sink: &str, payload: &Payload) -> bool {
        (self.predicate)(sink, payload)
    }
}

impl<F> fmt::Debug for FnFilter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter").finish_non_exhaustive()
    }
}
