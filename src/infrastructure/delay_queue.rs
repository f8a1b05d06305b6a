//! Blocking delay queue.
//!
//! A min-heap of [`DelayedElement`]s guarded by a `parking_lot` mutex. `take`
//! sleeps on a condvar until the earliest element is due; pushing an element
//! wakes sleepers so an earlier expiry re-arms their wait. Closing the queue
//! wakes every sleeper and makes `take` return `None`.

use crate::domain::delayed::DelayedElement;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

struct State<T> {
    heap: BinaryHeap<Reverse<DelayedElement<T>>>,
    next_sequence: u64,
    closed: bool,
}

impl<T> State<T> {
    fn insert(&mut self, value: T, expires_at: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.heap
            .push(Reverse(DelayedElement::new(value, expires_at, sequence)));
    }
}

/// Thread-safe queue releasing elements no earlier than their expiry.
pub struct DelayQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> DelayQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Schedule `value` to become available after `delay`.
    pub fn push(&self, value: T, delay: Duration) {
        self.push_at(value, Instant::now() + delay);
    }

    /// Schedule `value` to become available at `expires_at`.
    pub fn push_at(&self, value: T, expires_at: Instant) {
        self.state.lock().insert(value, expires_at);
        self.available.notify_all();
    }

    /// Schedule `value` after `delay` unless the queue is closed or already
    /// holds `capacity` elements. The check and the insert share one lock.
    pub fn try_push(&self, value: T, delay: Duration, capacity: usize) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.heap.len() >= capacity {
            return false;
        }
        state.insert(value, Instant::now() + delay);
        drop(state);
        self.available.notify_all();
        true
    }

    /// Remove and return the earliest element, blocking until it is due.
    ///
    /// Returns `None` once the queue is closed, even if elements remain.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            match Self::head_remaining(&state, now) {
                None => self.available.wait(&mut state),
                Some(remaining) if remaining.is_zero() => {
                    if let Some(Reverse(head)) = state.heap.pop() {
                        return Some(head.into_value());
                    }
                }
                Some(remaining) => {
                    self.available.wait_for(&mut state, remaining);
                }
            }
        }
    }

    /// Like [`take`](DelayQueue::take) but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            let until = match Self::head_remaining(&state, now) {
                Some(remaining) if remaining.is_zero() => {
                    return state.heap.pop().map(|Reverse(head)| head.into_value());
                }
                Some(remaining) => (now + remaining).min(deadline),
                None => deadline,
            };
            if now >= deadline {
                return None;
            }
            self.available.wait_until(&mut state, until);
        }
    }

    /// Remove the earliest element if it is due at `now`.
    pub fn poll(&self, now: Instant) -> Option<T> {
        let mut state = self.state.lock();
        match Self::head_remaining(&state, now) {
            Some(remaining) if remaining.is_zero() => {
                state.heap.pop().map(|Reverse(head)| head.into_value())
            }
            _ => None,
        }
    }

    fn head_remaining(state: &State<T>, now: Instant) -> Option<Duration> {
        state.heap.peek().map(|Reverse(head)| head.remaining(now))
    }

    /// Number of scheduled elements, due or not.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out elements and wake every waiting `take`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Whether [`close`](DelayQueue::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Discard every element, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.heap.len();
        state.heap.clear();
        removed
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DelayQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_releases_in_expiry_order() {
        let queue = DelayQueue::new();
        let now = Instant::now();
        queue.push_at("late", now + Duration::from_millis(30));
        queue.push_at("early", now + Duration::from_millis(10));
        queue.push_at("middle", now + Duration::from_millis(20));

        assert_eq!(queue.take(), Some("early"));
        assert_eq!(queue.take(), Some("middle"));
        assert_eq!(queue.take(), Some("late"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_expiry_is_fifo() {
        let queue = DelayQueue::new();
        let at = Instant::now();
        for i in 0..5 {
            queue.push_at(i, at);
        }
        let taken: Vec<_> = (0..5).filter_map(|_| queue.take()).collect();
        assert_eq!(taken, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_take_waits_for_expiry() {
        let queue = DelayQueue::new();
        let start = Instant::now();
        queue.push(1, Duration::from_millis(50));

        assert_eq!(queue.take(), Some(1));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_earlier_push_rearms_waiter() {
        let queue = Arc::new(DelayQueue::new());
        queue.push("slow", Duration::from_secs(60));

        let q = Arc::clone(&queue);
        let handle = thread::spawn(move || q.take());

        thread::sleep(Duration::from_millis(20));
        queue.push("fast", Duration::ZERO);

        assert_eq!(handle.join().unwrap(), Some("fast"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_on_empty_blocks_until_push() {
        let queue = Arc::new(DelayQueue::new());
        let q = Arc::clone(&queue);
        let handle = thread::spawn(move || q.take());

        thread::sleep(Duration::from_millis(20));
        queue.push(7, Duration::ZERO);
        assert_eq!(handle.join().unwrap(), Some(7));
    }

    #[test]
    fn test_take_timeout() {
        let queue = DelayQueue::new();
        queue.push(1, Duration::from_secs(60));
        assert_eq!(queue.take_timeout(Duration::from_millis(10)), None);

        queue.push(2, Duration::ZERO);
        assert_eq!(queue.take_timeout(Duration::from_millis(10)), Some(2));
    }

    #[test]
    fn test_poll_and_clear() {
        let queue = DelayQueue::new();
        let now = Instant::now();
        queue.push_at('a', now);
        queue.push_at('b', now + Duration::from_secs(60));

        assert_eq!(queue.poll(now), Some('a'));
        assert_eq!(queue.poll(now), None);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_releases_waiting_take() {
        let queue = Arc::new(DelayQueue::<u32>::new());
        queue.push(1, Duration::from_secs(60));

        let q = Arc::clone(&queue);
        let handle = thread::spawn(move || q.take());

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(handle.join().unwrap(), None);
        assert!(queue.is_closed());
        assert_eq!(queue.take_timeout(Duration::from_millis(10)), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_try_push_respects_capacity_under_contention() {
        let queue = Arc::new(DelayQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..5)
                        .filter(|i| q.try_push(t * 10 + i, Duration::from_secs(60), 10))
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 10);
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn test_try_push_refused_after_close() {
        let queue = DelayQueue::new();
        queue.close();
        assert!(!queue.try_push('a', Duration::ZERO, 10));
        assert!(queue.is_empty());
    }
}
