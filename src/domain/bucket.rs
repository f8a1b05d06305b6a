//! Token bucket arithmetic.
//!
//! Pure state over explicit instants, so the limiter can be tested with a
//! controllable clock. The bucket holds at most one second's worth of tokens
//! and starts full. Reservations may drive the balance negative; later callers
//! then wait for the debt to be repaid, which queues blocking callers fairly.

use std::time::{Duration, Instant};

/// A single-dimension token bucket.
///
/// A rate of zero (or less) means the dimension is unlimited.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate_per_sec`.
    pub fn new(rate_per_sec: f64, now: Instant) -> Self {
        let rate = if rate_per_sec.is_finite() {
            rate_per_sec.max(0.0)
        } else {
            0.0
        };
        Self {
            rate_per_sec: rate,
            tokens: rate,
            last_refill: now,
        }
    }

    /// Whether this bucket limits anything.
    pub fn is_unlimited(&self) -> bool {
        self.rate_per_sec <= 0.0
    }

    /// Configured rate (tokens per second).
    pub fn rate(&self) -> f64 {
        self.rate_per_sec
    }

    /// Current balance after refilling up to `now`.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Change the rate, keeping the balance within the new capacity.
    pub fn set_rate(&mut self, rate_per_sec: f64, now: Instant) {
        self.refill(now);
        let rate = if rate_per_sec.is_finite() {
            rate_per_sec.max(0.0)
        } else {
            0.0
        };
        self.rate_per_sec = rate;
        self.tokens = self.tokens.min(rate);
    }

    /// Time until `amount` tokens are available, zero if they are already.
    pub fn wait_time(&mut self, amount: f64, now: Instant) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }
        self.refill(now);
        let missing = amount - self.tokens;
        if missing <= 0.0 {
            Duration::ZERO
        } else {
            // A tiny rate can put the wait beyond what a Duration holds
            Duration::try_from_secs_f64(missing / self.rate_per_sec).unwrap_or(Duration::MAX)
        }
    }

    /// Take `amount` tokens, possibly leaving the balance negative.
    pub fn consume(&mut self, amount: f64, now: Instant) {
        if self.is_unlimited() {
            return;
        }
        self.refill(now);
        self.tokens -= amount;
    }

    /// Refill up to capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = self.last_refill.max(now);
        if self.is_unlimited() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(self.rate_per_sec);
    }
}
