//! Integration tests for the pooled dispatcher.

use sink_relay::application::envelope::SignalWaiter;
use sink_relay::infrastructure::mocks::{MockClock, RecordingSink, SinkCall};
use sink_relay::{
    Activity, DispatcherConfig, Envelope, EventSink, ManagedSink, Message, PooledDispatcher,
    SignalKind, SinkWriter, Snapshot, TrackingEvent, WriteError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Writer failing its first event write.
#[derive(Debug, Default)]
struct FailOnceWriter {
    failed: AtomicBool,
}

impl SinkWriter for FailOnceWriter {
    fn write_event(&self, _event: &TrackingEvent) -> Result<(), WriteError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(WriteError::msg("connection reset"));
        }
        Ok(())
    }

    fn write_activity(&self, _activity: &Activity) -> Result<(), WriteError> {
        Ok(())
    }

    fn write_snapshot(&self, _snapshot: &Snapshot) -> Result<(), WriteError> {
        Ok(())
    }

    fn write_message(&self, _message: &Message) -> Result<(), WriteError> {
        Ok(())
    }
}

fn event(sink: &Arc<RecordingSink>, id: &str) -> Envelope {
    Envelope::data(
        sink.clone(),
        TrackingEvent::new(id, "op").into(),
        Instant::now(),
    )
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_backpressure_rejects_one_past_capacity() {
    let dispatcher = PooledDispatcher::new(DispatcherConfig::new("bp").with_capacity(5)).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));

    // Not started: nothing consumes the queue
    for i in 0..5 {
        assert!(dispatcher.offer(event(&sink, &i.to_string())));
    }
    assert!(!dispatcher.offer(event(&sink, "sixth")));

    assert_eq!(dispatcher.queue_len(), 5);
    assert_eq!(dispatcher.snapshot().dropped, 1);
    assert_eq!(dispatcher.stats()["pool-queue-size"], 5);
}

#[test]
fn test_flush_is_a_barrier_across_workers() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("barrier")
            .with_pool_size(4)
            .with_capacity(256),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));

    // Queue everything up front so the flush sits between the two batches
    for i in 0..50 {
        assert!(dispatcher.offer(event(&sink, &format!("a{}", i))));
    }
    let (waiter, ack) = SignalWaiter::pair();
    assert!(dispatcher.offer(Envelope::signal(
        SignalKind::Flush,
        sink.clone(),
        Some(waiter),
        Instant::now(),
    )));
    for i in 0..50 {
        assert!(dispatcher.offer(event(&sink, &format!("b{}", i))));
    }

    dispatcher.start().unwrap();
    assert_eq!(ack.wait(Duration::from_secs(5)), Some(Ok(())));
    assert!(wait_until(|| dispatcher.snapshot().logged == 100));

    let calls = sink.calls();
    let flush_at = calls
        .iter()
        .position(|call| *call == SinkCall::Flush)
        .unwrap();
    for (index, call) in calls.iter().enumerate() {
        if let SinkCall::Log(label) = call {
            if label.starts_with('a') {
                assert!(index < flush_at, "{} written after flush", label);
            } else {
                assert!(index > flush_at, "{} written before flush", label);
            }
        }
    }
    dispatcher.shutdown(None);
}

#[test]
fn test_signal_round_trip_after_data() {
    let dispatcher =
        PooledDispatcher::new(DispatcherConfig::new("roundtrip").with_pool_size(2)).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    dispatcher.start().unwrap();

    dispatcher.offer(event(&sink, "a"));
    assert!(dispatcher
        .signal(sink.clone(), SignalKind::Flush, Duration::from_secs(2))
        .unwrap());
    dispatcher.offer(event(&sink, "b"));
    assert!(dispatcher
        .signal(sink.clone(), SignalKind::Close, Duration::from_secs(2))
        .unwrap());

    assert_eq!(
        sink.calls(),
        vec![
            SinkCall::Open,
            SinkCall::Log("a".to_string()),
            SinkCall::Flush,
            SinkCall::Log("b".to_string()),
            SinkCall::Close,
        ]
    );
    assert_eq!(dispatcher.snapshot().signals, 2);
    dispatcher.shutdown(None);
}

#[test]
fn test_failures_are_counted_once_per_attempt() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("count")
            .with_pool_size(2)
            .with_retry_interval(Duration::from_millis(20)),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    sink.fail_writes("x", 3);
    dispatcher.start().unwrap();

    dispatcher.offer(event(&sink, "x"));
    assert!(wait_until(|| dispatcher.snapshot().logged == 1));

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.exceptions, 3);
    assert_eq!(snapshot.requeued, 3);
    assert_eq!(snapshot.logged, 1);
    assert_eq!(snapshot.dropped, 0);
    assert_eq!(sink.write_attempts("x"), 4);
    assert_eq!(sink.logged_ids(), vec!["x"]);
    dispatcher.shutdown(None);
}

#[test]
fn test_end_to_end_retry_after_interval() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("e2e")
            .with_pool_size(2)
            .with_capacity(5)
            .with_retry_interval(Duration::from_millis(50)),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    sink.fail_writes("X", 1);
    dispatcher.start().unwrap();

    let started = Instant::now();
    assert!(dispatcher.offer(event(&sink, "X")));
    assert!(wait_until(|| dispatcher.snapshot().logged == 1));
    let elapsed = started.elapsed();

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.exceptions, 1);
    assert_eq!(snapshot.requeued, 1);
    assert_eq!(snapshot.logged, 1);
    assert_eq!(sink.logged_ids(), vec!["X"]);
    assert!(elapsed >= Duration::from_millis(50), "retried after {:?}", elapsed);
    dispatcher.shutdown(None);
}

#[test]
fn test_failing_sink_is_not_reopened_within_interval() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("throttle")
            .with_pool_size(1)
            .with_retry_interval(Duration::from_millis(100)),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    sink.fail_writes("a", 1);
    dispatcher.start().unwrap();

    dispatcher.offer(event(&sink, "a"));
    dispatcher.offer(event(&sink, "b"));
    assert!(wait_until(|| dispatcher.snapshot().logged == 2));

    let snapshot = dispatcher.snapshot();
    // "b" found the sink latched and was delayed without a write attempt
    assert_eq!(snapshot.exceptions, 2);
    assert_eq!(snapshot.requeued, 2);
    assert_eq!(snapshot.recoveries, 1);
    assert_eq!(sink.write_attempts("b"), 1);
    assert!(sink.error_state().is_none());
    dispatcher.shutdown(None);
}

#[test]
fn test_reopen_throttle_follows_sink_clock() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("sink-clock")
            .with_pool_size(1)
            .with_retry_interval(Duration::from_millis(20)),
    )
    .unwrap();
    // The sink's clock runs an hour ahead of the pool's wall clock
    let clock = MockClock::new(Instant::now() + Duration::from_secs(3600));
    let sink = Arc::new(
        ManagedSink::builder()
            .with_name("mocked")
            .with_writer(FailOnceWriter::default())
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap(),
    );
    dispatcher.start().unwrap();

    dispatcher.offer(Envelope::data(
        sink.clone(),
        TrackingEvent::new("a", "op").into(),
        Instant::now(),
    ));
    assert!(wait_until(|| dispatcher.snapshot().exceptions >= 2));

    // Wall time passes but the sink's clock does not: still throttled
    thread::sleep(Duration::from_millis(100));
    assert_eq!(dispatcher.snapshot().logged, 0);
    assert_eq!(sink.error_age(), Some(Duration::ZERO));

    clock.advance(Duration::from_secs(1));
    assert!(wait_until(|| dispatcher.snapshot().logged == 1));
    assert_eq!(dispatcher.snapshot().recoveries, 1);
    assert!(sink.error_state().is_none());
    dispatcher.shutdown(None);
}

#[test]
fn test_drop_on_error_toggled_at_runtime() {
    let dispatcher = PooledDispatcher::new(
        DispatcherConfig::new("toggle")
            .with_pool_size(1)
            .with_retry_interval(Duration::from_millis(10)),
    )
    .unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    sink.fail_writes("x", usize::MAX);
    dispatcher.set_drop_on_error(true);
    assert!(dispatcher.drop_on_error());
    dispatcher.start().unwrap();

    dispatcher.offer(event(&sink, "x"));
    assert!(wait_until(|| dispatcher.snapshot().dropped == 1));
    assert_eq!(dispatcher.delay_len(), 0);
    assert_eq!(dispatcher.snapshot().requeued, 0);
    dispatcher.shutdown(None);
}

#[test]
fn test_reset_stats_keeps_live_sizes() {
    let dispatcher = PooledDispatcher::new(DispatcherConfig::new("reset").with_capacity(2)).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    dispatcher.offer(event(&sink, "a"));
    dispatcher.offer(event(&sink, "b"));
    dispatcher.offer(event(&sink, "c"));

    dispatcher.reset_stats();
    let stats = dispatcher.stats();
    assert_eq!(stats["pool-dropped"], 0);
    assert_eq!(stats["pool-queue-size"], 2);
}
