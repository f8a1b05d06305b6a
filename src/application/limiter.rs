//! Message and byte rate limiting for sinks.
//!
//! The limiter grants `obtain(count, bytes)` requests against two token
//! buckets, one counting messages and one counting bytes. A request is granted
//! once both buckets can cover it. In blocking mode the caller sleeps until
//! then; with a timeout the request is denied if the wait would exceed it.
//!
//! Reservations are taken before sleeping, so concurrent blocking callers
//! queue behind each other instead of racing for the same refill.

use crate::application::ports::Clock;
use crate::domain::bucket::TokenBucket;
use crate::infrastructure::clock::SystemClock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How [`EventLimiter::obtain`] behaves when the limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LimiterMode {
    /// Wait as long as needed; never deny
    #[default]
    Block,
    /// Wait at most this long, deny otherwise. Zero never waits.
    Timeout(Duration),
}

/// Limiter settings. A maximum of zero leaves that dimension unlimited.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LimiterConfig {
    /// Maximum messages per second
    pub max_mps: f64,
    /// Maximum bytes per second
    pub max_bps: f64,
    /// When false every request is granted immediately
    pub enabled: bool,
    /// Blocking policy
    pub mode: LimiterMode,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_mps: 0.0,
            max_bps: 0.0,
            enabled: true,
            mode: LimiterMode::Block,
        }
    }
}

impl LimiterConfig {
    /// Limit messages per second.
    pub fn with_max_mps(mut self, max_mps: f64) -> Self {
        self.max_mps = max_mps;
        self
    }

    /// Limit bytes per second.
    pub fn with_max_bps(mut self, max_bps: f64) -> Self {
        self.max_bps = max_bps;
        self
    }

    /// Enable or disable limiting.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the blocking policy.
    pub fn with_mode(mut self, mode: LimiterMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug)]
struct Buckets {
    msgs: TokenBucket,
    bytes: TokenBucket,
    mode: LimiterMode,
}

#[derive(Debug, Default)]
struct Counters {
    granted_msgs: AtomicU64,
    granted_bytes: AtomicU64,
    denied: AtomicU64,
    delayed: AtomicU64,
    delay_nanos: AtomicU64,
    last_delay_nanos: AtomicU64,
}

/// Two-dimension rate limiter shared by sinks.
#[derive(Debug)]
pub struct EventLimiter {
    buckets: Mutex<Buckets>,
    enabled: AtomicBool,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl EventLimiter {
    /// Create a limiter using the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            buckets: Mutex::new(Buckets {
                msgs: TokenBucket::new(config.max_mps, now),
                bytes: TokenBucket::new(config.max_bps, now),
                mode: config.mode,
            }),
            enabled: AtomicBool::new(config.enabled),
            counters: Counters::default(),
            clock,
        }
    }

    /// Obtain permits using the configured mode.
    ///
    /// Returns `true` when granted. Blocking mode always returns `true`.
    pub fn obtain(&self, count: u64, bytes: u64) -> bool {
        let timeout = match self.buckets.lock().mode {
            LimiterMode::Block => None,
            LimiterMode::Timeout(t) => Some(t),
        };
        self.acquire(count, bytes, timeout)
    }

    /// Obtain permits waiting at most `timeout`, regardless of the mode.
    pub fn try_obtain(&self, count: u64, bytes: u64, timeout: Duration) -> bool {
        self.acquire(count, bytes, Some(timeout))
    }

    fn acquire(&self, count: u64, bytes: u64, timeout: Option<Duration>) -> bool {
        if !self.is_enabled() {
            self.record_grant(count, bytes, Duration::ZERO);
            return true;
        }

        let wait = {
            let mut buckets = self.buckets.lock();
            let now = self.clock.now();
            let wait = buckets
                .msgs
                .wait_time(count as f64, now)
                .max(buckets.bytes.wait_time(bytes as f64, now));

            if timeout.is_some_and(|limit| wait > limit) {
                self.counters.denied.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            buckets.msgs.consume(count as f64, now);
            buckets.bytes.consume(bytes as f64, now);
            wait
        };

        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.record_grant(count, bytes, wait);
        true
    }

    fn record_grant(&self, count: u64, bytes: u64, wait: Duration) {
        let c = &self.counters;
        c.granted_msgs.fetch_add(count, Ordering::Relaxed);
        c.granted_bytes.fetch_add(bytes, Ordering::Relaxed);

        let nanos: u64 = wait.as_nanos().try_into().unwrap_or(u64::MAX);
        c.last_delay_nanos.store(nanos, Ordering::Relaxed);
        if nanos > 0 {
            c.delayed.fetch_add(1, Ordering::Relaxed);
            c.delay_nanos.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    /// Change both ceilings. Zero removes the limit for that dimension.
    pub fn set_limits(&self, max_mps: f64, max_bps: f64) {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        buckets.msgs.set_rate(max_mps, now);
        buckets.bytes.set_rate(max_bps, now);
    }

    /// Change the blocking policy.
    pub fn set_mode(&self, mode: LimiterMode) {
        self.buckets.lock().mode = mode;
    }

    /// Enable or disable limiting.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether limiting is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Current settings.
    pub fn config(&self) -> LimiterConfig {
        let buckets = self.buckets.lock();
        LimiterConfig {
            max_mps: buckets.msgs.rate(),
            max_bps: buckets.bytes.rate(),
            enabled: self.is_enabled(),
            mode: buckets.mode,
        }
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let c = &self.counters;
        let config = self.config();
        LimiterSnapshot {
            granted_msgs: c.granted_msgs.load(Ordering::Relaxed),
            granted_bytes: c.granted_bytes.load(Ordering::Relaxed),
            denied: c.denied.load(Ordering::Relaxed),
            delayed: c.delayed.load(Ordering::Relaxed),
            delay_nanos: c.delay_nanos.load(Ordering::Relaxed),
            last_delay: Duration::from_nanos(c.last_delay_nanos.load(Ordering::Relaxed)),
            max_mps: config.max_mps,
            max_bps: config.max_bps,
        }
    }

    /// Zero the counters. Limits and bucket balances are kept.
    pub fn reset_stats(&self) {
        let c = &self.counters;
        for counter in [
            &c.granted_msgs,
            &c.granted_bytes,
            &c.denied,
            &c.delayed,
            &c.delay_nanos,
            &c.last_delay_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time limiter counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LimiterSnapshot {
    /// Messages granted
    pub granted_msgs: u64,
    /// Bytes granted
    pub granted_bytes: u64,
    /// Requests denied
    pub denied: u64,
    /// Grants that had to wait
    pub delayed: u64,
    /// Total time spent waiting
    pub delay_nanos: u64,
    /// Wait of the most recent grant
    pub last_delay: Duration,
    /// Current message ceiling
    pub max_mps: f64,
    /// Current byte ceiling
    pub max_bps: f64,
}

impl LimiterSnapshot {
    /// Add the counters to a flat statistics map.
    pub fn export(&self, map: &mut BTreeMap<String, u64>) {
        map.insert("limiter-granted-msgs".into(), self.granted_msgs);
        map.insert("limiter-granted-bytes".into(), self.granted_bytes);
        map.insert("limiter-denied".into(), self.denied);
        map.insert("limiter-delayed".into(), self.delayed);
        map.insert("limiter-delay-nanos".into(), self.delay_nanos);
        map.insert(
            "limiter-last-delay-nanos".into(),
            self.last_delay.as_nanos().try_into().unwrap_or(u64::MAX),
        );
        map.insert("limiter-max-mps".into(), self.max_mps as u64);
        map.insert("limiter-max-bps".into(), self.max_bps as u64);
    }
}
