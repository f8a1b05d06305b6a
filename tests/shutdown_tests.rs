//! Integration tests for dispatcher and front-end shutdown.

use crossbeam_channel::{unbounded, Receiver, Sender};
use sink_relay::application::envelope::SignalWaiter;
use sink_relay::infrastructure::mocks::{MockCaptureLayer, RecordingSink};
use sink_relay::{
    Activity, BufferedSink, DispatcherConfig, DispatcherRegistry, Envelope, EventSink, ManagedSink,
    Message, PooledDispatcher, SignalKind, SinkError, SinkWriter, Snapshot, TrackingEvent,
    WriteError,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

/// Writer whose close waits for a permit.
#[derive(Debug)]
struct SlowCloseWriter {
    permits: Receiver<()>,
}

impl SlowCloseWriter {
    fn new() -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        (Self { permits: rx }, tx)
    }
}

impl SinkWriter for SlowCloseWriter {
    fn close(&self) -> Result<(), WriteError> {
        let _ = self.permits.recv_timeout(Duration::from_secs(5));
        Ok(())
    }

    fn write_event(&self, _event: &TrackingEvent) -> Result<(), WriteError> {
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

fn config(name: &str) -> DispatcherConfig {
    DispatcherConfig::new(name)
        .with_pool_size(2)
        .with_capacity(64)
        .with_retry_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(2))
}

fn event(sink: &Arc<RecordingSink>, id: &str) -> Envelope {
    Envelope::data(
        sink.clone(),
        TrackingEvent::new(id, "op").into(),
        Instant::now(),
    )
}

#[test]
fn test_shutdown_leaves_nothing_behind() {
    let dispatcher = PooledDispatcher::new(config("drain")).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    sink.fail_writes("stuck", usize::MAX);
    dispatcher.start().unwrap();

    dispatcher.offer(event(&sink, "stuck"));
    for i in 0..20 {
        dispatcher.offer(event(&sink, &i.to_string()));
    }
    thread::sleep(Duration::from_millis(50));

    dispatcher.shutdown(None);

    assert!(dispatcher.is_shut_down());
    assert_eq!(dispatcher.running_threads(), 0);
    assert_eq!(dispatcher.queue_len(), 0);
    assert_eq!(dispatcher.delay_len(), 0);
    assert!(!dispatcher.offer(event(&sink, "late")));
    assert!(dispatcher.snapshot().dropped >= 1);
}

#[test]
fn test_shutdown_before_start_clears_queue() {
    let dispatcher = PooledDispatcher::new(config("cold")).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    dispatcher.offer(event(&sink, "a"));
    dispatcher.offer(event(&sink, "b"));

    dispatcher.shutdown(None);

    assert_eq!(dispatcher.queue_len(), 0);
    assert_eq!(dispatcher.snapshot().dropped, 2);
    assert!(matches!(
        dispatcher.start(),
        Err(SinkError::ShutDown { .. })
    ));
}

#[test]
fn test_shutdown_is_logged_with_reason() {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let dispatcher = PooledDispatcher::new(config("logged")).unwrap();

    tracing::subscriber::with_default(subscriber, || {
        let reason = SinkError::ShutDown {
            pool: "upstream".to_string(),
        };
        dispatcher.shutdown(Some(&reason));
        dispatcher.shutdown(None);
    });

    let events = capture.matching("dispatcher shutting down");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::INFO);
    assert_eq!(events[0].field("pool"), Some("logged"));
    assert_eq!(
        events[0].field("reason"),
        Some("dispatcher 'upstream' is shut down")
    );
}

#[test]
fn test_blocked_producer_is_released_by_shutdown() {
    let dispatcher = PooledDispatcher::new(config("release").with_capacity(1)).unwrap();
    let sink = Arc::new(RecordingSink::new("rec"));
    assert!(dispatcher.offer(event(&sink, "a")));

    let producer = {
        let dispatcher = dispatcher.clone();
        let sink = sink.clone();
        thread::spawn(move || dispatcher.put(event(&sink, "b")))
    };
    thread::sleep(Duration::from_millis(50));
    dispatcher.shutdown(None);

    let err = producer.join().unwrap().unwrap_err();
    assert!(matches!(err, SinkError::Interrupted { .. }));
    assert_eq!(dispatcher.queue_len(), 0);
    assert_eq!(dispatcher.snapshot().dropped, 2);
}

#[test]
fn test_front_end_shutdown_closes_downstream() {
    let registry = DispatcherRegistry::new();
    let downstream = Arc::new(RecordingSink::new("rec"));
    let sink = BufferedSink::builder()
        .with_sink(downstream.clone())
        .with_dispatcher(registry.get_or_start(config("front")).unwrap())
        .build()
        .unwrap();
    sink.open().unwrap();

    for i in 0..10 {
        sink.log_event(TrackingEvent::new(i.to_string(), "op")).unwrap();
    }
    sink.shutdown().unwrap();

    assert!(!downstream.is_open());
    assert_eq!(downstream.logged_ids().len(), 10);
    assert!(sink.dispatcher().is_shut_down());

    // A second shutdown and a late close are harmless
    sink.shutdown().unwrap();
    sink.close().unwrap();

    // The registry replaces the dead pool on next use
    let fresh = registry.get_or_start(config("front")).unwrap();
    assert!(!fresh.is_shut_down());
    registry.shutdown_all(None);
}

#[test]
fn test_shutdown_signal_with_full_queue_stops_every_thread() {
    let dispatcher = PooledDispatcher::new(
        config("full-stop")
            .with_pool_size(1)
            .with_capacity(2)
            .with_shutdown_timeout(Duration::from_millis(300)),
    )
    .unwrap();
    let (writer, gate) = SlowCloseWriter::new();
    let sink: Arc<dyn EventSink> = Arc::new(
        ManagedSink::builder()
            .with_name("slow-close")
            .with_writer(writer)
            .build()
            .unwrap(),
    );
    sink.open().unwrap();
    dispatcher.start().unwrap();

    let (waiter, ack) = SignalWaiter::pair();
    assert!(dispatcher.offer(Envelope::signal(
        SignalKind::Shutdown,
        sink.clone(),
        Some(waiter),
        Instant::now(),
    )));
    // The worker is now inside close(); fill the queue behind it
    assert!(wait_until(|| dispatcher.queue_len() == 0));
    for id in ["a", "b"] {
        assert!(dispatcher.offer(Envelope::data(
            sink.clone(),
            TrackingEvent::new(id, "op").into(),
            Instant::now(),
        )));
    }
    gate.send(()).unwrap();

    assert_eq!(ack.wait(Duration::from_secs(2)), Some(Ok(())));
    assert!(wait_until(|| dispatcher.running_threads() == 0));
    assert_eq!(dispatcher.queue_len(), 0);
    assert_eq!(dispatcher.snapshot().dropped, 2);

    // A later shutdown has nothing left to stop
    dispatcher.shutdown(None);
    assert_eq!(dispatcher.running_threads(), 0);
}
