//! Admission-controlled dispatch loop and the public scheduler facade.
//!
//! [`QueryScheduler`] owns the request queue, the batcher's pending set and
//! the metrics behind one mutex with short, non-awaiting critical sections.
//! Admission is a semaphore of `concurrency_limit` permits: a permit is
//! held from dequeue to settle, so a freed slot is reacquired by the loop
//! before any caller can observe idle capacity. The loop suspends on a
//! [`Notify`] when the queue is empty — edge-triggered wakes, no polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use querydeck_core::{ConfigError, DedupeKey, SchedulerConfig, SchedulerError, SubjectKey};

use crate::batcher::{Batcher, ResultMapper, ResultReceiver};
use crate::metrics::SchedulerMetrics;
use crate::priority::{PriorityModel, QueryKindRegistry};
use crate::queue::{RequestEntry, RequestQueue};
use crate::transport::QueryTransport;

struct Inner {
    queue: RequestQueue,
    batcher: Batcher,
    metrics: SchedulerMetrics,
    in_flight: usize,
}

/// Priority-ordered, batching, cancellable dispatcher for analytical
/// queries against a concurrency-limited engine.
///
/// Cheap to clone; all clones share the same state. Spawn [`run`] on the
/// runtime once, then enqueue from any number of call sites.
///
/// [`run`]: QueryScheduler::run
#[derive(Clone)]
pub struct QueryScheduler {
    inner: Arc<Mutex<Inner>>,
    transport: Arc<dyn QueryTransport>,
    slots: Arc<Semaphore>,
    wake: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    concurrency_limit: usize,
}

impl QueryScheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: QueryKindRegistry,
        transport: Arc<dyn QueryTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let model = PriorityModel::new(registry, &config);
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: RequestQueue::new(model),
                batcher: Batcher::new(),
                metrics: SchedulerMetrics::default(),
                in_flight: 0,
            })),
            transport,
            slots: Arc::new(Semaphore::new(config.concurrency_limit)),
            wake: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            concurrency_limit: config.concurrency_limit,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("scheduler state lock poisoned")
    }

    /// Enqueue a query, coalescing with any pending ask for the same key.
    /// The receiver resolves with the raw transport result.
    pub fn add_request(&self, dedupe: DedupeKey, payload: serde_json::Value) -> ResultReceiver {
        self.add_request_mapped(dedupe, payload, Box::new(|raw| Ok(raw.clone())))
    }

    /// Like [`add_request`], with a per-caller transform applied to the
    /// shared raw result at settle time.
    ///
    /// [`add_request`]: QueryScheduler::add_request
    pub fn add_request_mapped(
        &self,
        dedupe: DedupeKey,
        payload: serde_json::Value,
        mapper: ResultMapper,
    ) -> ResultReceiver {
        let mut inner = self.lock();
        let (rx, created) = inner.batcher.join(&dedupe, mapper);
        if created {
            inner.queue.enqueue(dedupe, payload);
            drop(inner);
            self.wake.notify_one();
        } else {
            inner.metrics.record_dedupe();
        }
        rx
    }

    /// Signal that the user navigated to this subject.
    pub fn mark_subject_active(&self, subject: &SubjectKey) {
        self.lock().queue.mark_subject_active(subject);
    }

    /// Signal that the user navigated away from this subject.
    pub fn mark_subject_inactive(&self, subject: &SubjectKey) {
        self.lock().queue.mark_subject_inactive(subject);
    }

    /// Signal that the user focused a specific column.
    pub fn mark_field_active(&self, subject: &SubjectKey, fingerprint: &str) {
        self.lock().queue.mark_field_active(subject, fingerprint);
    }

    pub fn clear_field_active(&self) {
        self.lock().queue.clear_field_active();
    }

    /// Tear down a subject. Queued entries fail synchronously with a
    /// cancellation; entries already admitted run to completion but their
    /// results are discarded at settle.
    pub fn cancel_subject(&self, subject: &SubjectKey) {
        let mut inner = self.lock();
        let entries = inner.queue.cancel_subject(subject);
        for entry in &entries {
            inner.batcher.fail(
                &entry.dedupe,
                SchedulerError::Cancelled {
                    subject: subject.clone(),
                },
            );
        }
        let superseded = inner.batcher.mark_subject_cancelled(subject);
        inner.metrics.record_cancellations(entries.len() + superseded);
    }

    /// Snapshot of the current counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        let inner = self.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.queue_depth = inner.queue.depth();
        snapshot.in_flight = inner.in_flight;
        snapshot
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.depth()
    }

    /// Stop the dispatch loop cooperatively. In-flight calls settle
    /// normally; queued entries stay queued and their receivers resolve
    /// with an error once the scheduler is dropped.
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        self.stopping.store(true, Ordering::Release);
        self.slots.close();
        // notify_one stores a permit, so a signal landing between the
        // loop's queue check and its await is not lost.
        self.wake.notify_one();
    }

    /// Run the dispatch loop until shutdown. Spawn this once on the
    /// runtime that should host transport calls.
    pub async fn run(&self) {
        info!(
            concurrency_limit = self.concurrency_limit,
            "query scheduler started"
        );
        'outer: loop {
            // One permit per admitted entry; acquisition blocks while the
            // engine is saturated. The semaphore closes on shutdown.
            let permit = match Arc::clone(&self.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let (entry, epoch) = loop {
                if self.stopping.load(Ordering::Acquire) {
                    break 'outer;
                }
                let wakeup = self.wake.notified();
                if let Some(admitted) = self.admit_next() {
                    break admitted;
                }
                wakeup.await;
            };
            self.dispatch(entry, epoch, permit);
        }
        info!("query scheduler stopped");
    }

    /// Pull the most urgent entry and transition it to in-flight.
    fn admit_next(&self) -> Option<(RequestEntry, u64)> {
        let mut inner = self.lock();
        let entry = inner.queue.dequeue_next()?;
        let epoch = inner.batcher.mark_in_flight(&entry.dedupe);
        inner.in_flight += 1;
        assert!(
            inner.in_flight <= self.concurrency_limit,
            "in-flight count exceeded the concurrency limit"
        );
        inner
            .metrics
            .record_dispatch(entry.kind, entry.enqueued_at.elapsed());
        Some((entry, epoch))
    }

    /// Hand the entry to the transport on its own task. The permit rides
    /// along and is released only after the settle, so the loop reuses the
    /// slot immediately.
    fn dispatch(&self, entry: RequestEntry, epoch: u64, permit: OwnedSemaphorePermit) {
        let transport = Arc::clone(&self.transport);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!(
                id = %entry.id,
                dedupe = %entry.dedupe,
                priority = entry.priority,
                "dispatching query"
            );
            let outcome = transport
                .execute(&entry.payload)
                .await
                .map_err(SchedulerError::from);
            if let Err(error) = &outcome {
                warn!(dedupe = %entry.dedupe, error = %error, "transport call failed");
            }

            let mut guard = inner.lock().expect("scheduler state lock poisoned");
            if outcome.is_err() {
                guard.metrics.record_failure();
            }
            guard.batcher.settle(&entry.dedupe, epoch, outcome);
            guard.in_flight -= 1;
            drop(guard);
            drop(permit);
        });
    }
}
