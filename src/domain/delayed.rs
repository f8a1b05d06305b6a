//! "Deliver no earlier than" wrapper used to schedule retries.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// A value that becomes available at an absolute instant.
///
/// Ordering is earliest-expiry first. Elements with the same expiry are ordered
/// by their insertion sequence so the order is total and stable, which keeps
/// a heap of these a valid priority structure.
#[derive(Debug)]
pub struct DelayedElement<T> {
    value: T,
    expires_at: Instant,
    sequence: u64,
}

impl<T> DelayedElement<T> {
    /// Wrap `value` so it expires at `expires_at`.
    pub fn new(value: T, expires_at: Instant, sequence: u64) -> Self {
        Self {
            value,
            expires_at,
            sequence,
        }
    }

    /// Wrap `value` so it expires `delay` after `now`.
    pub fn after(value: T, now: Instant, delay: Duration, sequence: u64) -> Self {
        Self::new(value, now + delay, sequence)
    }

    /// Absolute expiry instant.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Insertion sequence used as tie-break.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time left until expiry, zero once due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Whether the element may be delivered at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Borrow the wrapped value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the wrapped value.
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> PartialEq for DelayedElement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for DelayedElement<T> {}

impl<T> PartialOrd for DelayedElement<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedElement<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.expires_at
            .cmp(&other.expires_at)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}
