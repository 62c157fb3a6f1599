//! End-to-end scenarios: priority ordering, coalescing, cancellation and
//! admission control through the full scheduler facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use querydeck_core::{DedupeKey, QueryKind, SchedulerConfig, TransportError};
use querydeck_scheduler::{QueryKindRegistry, QueryScheduler, QueryTransport};

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("querydeck_scheduler=debug")
        .try_init();
}

/// Records payloads and completes after a short simulated engine delay.
struct RecordingTransport {
    calls: Mutex<Vec<serde_json::Value>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    delay: Duration,
}

impl RecordingTransport {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            delay,
        })
    }

    fn labels(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|payload| payload["label"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl QueryTransport for RecordingTransport {
    async fn execute(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.calls.lock().unwrap().push(payload.clone());
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        sleep(self.delay).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "echo": payload }))
    }
}

/// Records payloads, then blocks until the test releases the gate.
struct GatedTransport {
    calls: Mutex<Vec<serde_json::Value>>,
    gate: Semaphore,
}

impl GatedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn labels(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|payload| payload["label"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl QueryTransport for GatedTransport {
    async fn execute(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.calls.lock().unwrap().push(payload.clone());
        self.gate.acquire().await.expect("gate closed").forget();
        Ok(json!({ "echo": payload }))
    }
}

/// Always fails.
struct BrokenTransport;

#[async_trait]
impl QueryTransport for BrokenTransport {
    async fn execute(
        &self,
        _payload: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        Err(TransportError::new("engine unavailable"))
    }
}

fn scheduler_with(
    limit: usize,
    transport: Arc<dyn QueryTransport>,
) -> (QueryScheduler, JoinHandle<()>) {
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(limit),
        QueryKindRegistry::default(),
        transport,
    )
    .expect("valid config");
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };
    (scheduler, runner)
}

async fn wait_for_calls(transport: &GatedTransport, count: usize) {
    for _ in 0..10_000 {
        if transport.call_count() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("transport never reached {count} calls");
}

// Base priorities from the default registry: Rows=10, NullCount=20,
// Histogram=30; active boost 25.

#[tokio::test(start_paused = true)]
async fn dispatch_order_respects_priority_then_fifo() {
    init_logs();
    let transport = RecordingTransport::new(Duration::from_millis(5));
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(1),
        QueryKindRegistry::default(),
        transport.clone() as Arc<dyn QueryTransport>,
    )
    .expect("valid config");

    // Enqueue everything before the loop starts so ordering is decided
    // purely by priority.
    let receivers = vec![
        scheduler.add_request(
            DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c1"),
            json!({"label": "a30-1"}),
        ),
        scheduler.add_request(
            DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c2"),
            json!({"label": "a30-2"}),
        ),
        scheduler.add_request(DedupeKey::new("a", QueryKind::Rows), json!({"label": "a10"})),
        scheduler.add_request(
            DedupeKey::with_fingerprint("b", QueryKind::NullCount, "c1"),
            json!({"label": "b20"}),
        ),
    ];

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    for rx in receivers {
        rx.await.expect("scheduler alive").expect("query succeeds");
    }
    assert_eq!(transport.labels(), vec!["a10", "b20", "a30-1", "a30-2"]);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn activating_subject_promotes_its_queries() {
    init_logs();
    let transport = RecordingTransport::new(Duration::from_millis(5));
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(1),
        QueryKindRegistry::default(),
        transport.clone() as Arc<dyn QueryTransport>,
    )
    .expect("valid config");

    let receivers = vec![
        scheduler.add_request(
            DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c1"),
            json!({"label": "a30-1"}),
        ),
        scheduler.add_request(
            DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c2"),
            json!({"label": "a30-2"}),
        ),
        scheduler.add_request(DedupeKey::new("a", QueryKind::Rows), json!({"label": "a10"})),
        scheduler.add_request(
            DedupeKey::with_fingerprint("b", QueryKind::NullCount, "c1"),
            json!({"label": "b20"}),
        ),
    ];

    // b's null-count drops from 20 to -5 and must now lead the order.
    scheduler.mark_subject_active(&"b".to_string());

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    for rx in receivers {
        rx.await.expect("scheduler alive").expect("query succeeds");
    }
    assert_eq!(transport.labels(), vec!["b20", "a10", "a30-1", "a30-2"]);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_share_one_transport_call() {
    init_logs();
    let transport = RecordingTransport::new(Duration::from_millis(5));
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(1),
        QueryKindRegistry::default(),
        transport.clone() as Arc<dyn QueryTransport>,
    )
    .expect("valid config");

    let key = DedupeKey::with_fingerprint("sales", QueryKind::NullCount, "amount");
    let rx1 = scheduler.add_request(key.clone(), json!({"label": "nulls"}));
    let rx2 = scheduler.add_request(key, json!({"label": "nulls"}));

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let first = rx1.await.unwrap().unwrap();
    let second = rx2.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.labels().len(), 1, "exactly one network unit");

    let metrics = scheduler.metrics();
    assert_eq!(metrics.dedupe_hits, 1);
    assert_eq!(metrics.total_dispatched(), 1);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn late_caller_joins_in_flight_request() {
    init_logs();
    let transport = GatedTransport::new();
    let (scheduler, runner) = scheduler_with(1, transport.clone() as Arc<dyn QueryTransport>);

    let key = DedupeKey::with_fingerprint("sales", QueryKind::TopK, "country");
    let rx1 = scheduler.add_request(key.clone(), json!({"label": "topk"}));
    wait_for_calls(&transport, 1).await;

    // Already in flight; the second caller still coalesces.
    let rx2 = scheduler.add_request(key, json!({"label": "topk"}));
    transport.release(1);

    assert!(rx1.await.unwrap().is_ok());
    assert!(rx2.await.unwrap().is_ok());
    assert_eq!(transport.call_count(), 1);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_subject_fails_pending_and_discards_in_flight() {
    init_logs();
    let transport = GatedTransport::new();
    let (scheduler, runner) = scheduler_with(1, transport.clone() as Arc<dyn QueryTransport>);

    let in_flight = scheduler.add_request(DedupeKey::new("a", QueryKind::Rows), json!({"label": "a-rows"}));
    wait_for_calls(&transport, 1).await;

    let pending1 = scheduler.add_request(
        DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c1"),
        json!({"label": "a-h1"}),
    );
    let pending2 = scheduler.add_request(
        DedupeKey::with_fingerprint("a", QueryKind::Histogram, "c2"),
        json!({"label": "a-h2"}),
    );
    let survivor = scheduler.add_request(DedupeKey::new("b", QueryKind::Rows), json!({"label": "b-rows"}));

    scheduler.cancel_subject(&"a".to_string());

    // Pending entries fail synchronously with a cancellation, exactly once.
    for rx in [pending1, pending2] {
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
    }

    // The admitted entry completes but its result is discarded.
    transport.release(2);
    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());

    // b is untouched, and the cancelled histograms were never dispatched.
    assert!(survivor.await.unwrap().is_ok());
    assert_eq!(transport.labels(), vec!["a-rows", "b-rows"]);
    assert_eq!(scheduler.metrics().cancelled, 3);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn request_after_cancel_gets_a_fresh_call() {
    init_logs();
    let transport = GatedTransport::new();
    let (scheduler, runner) = scheduler_with(1, transport.clone() as Arc<dyn QueryTransport>);

    let key = DedupeKey::new("a", QueryKind::Rows);
    let stale = scheduler.add_request(key.clone(), json!({"label": "stale"}));
    wait_for_calls(&transport, 1).await;

    scheduler.cancel_subject(&"a".to_string());

    // Issued after the teardown: must not inherit the cancellation, and
    // must not be answered by the superseded call's result.
    let fresh = scheduler.add_request(key, json!({"label": "fresh"}));

    transport.release(2);
    assert!(stale.await.unwrap().unwrap_err().is_cancellation());
    assert_eq!(fresh.await.unwrap().unwrap()["echo"]["label"], "fresh");
    assert_eq!(transport.labels(), vec!["stale", "fresh"]);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_parked_runner() {
    init_logs();
    let transport = RecordingTransport::new(Duration::from_millis(1));
    let (scheduler, runner) = scheduler_with(1, transport as Arc<dyn QueryTransport>);

    // Let the loop park on the empty queue before signalling.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("runner must stop after shutdown")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_concurrency_limit() {
    init_logs();
    let transport = RecordingTransport::new(Duration::from_millis(10));
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(2),
        QueryKindRegistry::default(),
        transport.clone() as Arc<dyn QueryTransport>,
    )
    .expect("valid config");

    let mut receivers = Vec::new();
    for subject in ["a", "b", "c"] {
        for column in ["x", "y"] {
            receivers.push(scheduler.add_request(
                DedupeKey::with_fingerprint(subject, QueryKind::Histogram, column),
                json!({"label": format!("{subject}-{column}")}),
            ));
        }
    }

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    for rx in receivers {
        rx.await.unwrap().unwrap();
    }
    assert_eq!(transport.labels().len(), 6);
    let peak = transport.max_concurrent.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {peak} exceeded the limit");
    assert!(peak >= 1);

    scheduler.shutdown();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn transport_failure_reaches_every_waiter() {
    init_logs();
    let scheduler = QueryScheduler::new(
        SchedulerConfig::new(1),
        QueryKindRegistry::default(),
        Arc::new(BrokenTransport),
    )
    .expect("valid config");

    // Both callers registered before the loop starts, so they share the
    // single failing call.
    let key = DedupeKey::new("sales", QueryKind::Rows);
    let rx1 = scheduler.add_request(key.clone(), json!({"label": "rows"}));
    let rx2 = scheduler.add_request(key, json!({"label": "rows"}));

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    for rx in [rx1, rx2] {
        let err = rx.await.unwrap().unwrap_err();
        assert!(!err.is_cancellation(), "transport failure is not a cancellation");
    }
    assert_eq!(scheduler.metrics().transport_failures, 1);

    scheduler.shutdown();
    runner.await.unwrap();
}
