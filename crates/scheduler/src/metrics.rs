//! Scheduler operational counters.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use querydeck_core::QueryKind;

/// Counters exposed as a snapshot from the scheduler facade.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Dispatched transport calls per query kind.
    pub dispatched: HashMap<QueryKind, u64>,
    /// Requests answered by an already-pending entry instead of a new call.
    pub dedupe_hits: u64,
    /// Entries failed with a cancellation signal.
    pub cancelled: u64,
    /// Transport calls that returned an error.
    pub transport_failures: u64,
    /// Entries waiting in the queue at snapshot time.
    pub queue_depth: usize,
    /// Admitted entries not yet settled at snapshot time.
    pub in_flight: usize,
    /// Rolling average time entries spent queued before dispatch.
    pub avg_queue_wait: Duration,
    /// Wall-clock time of the most recent dispatch.
    pub last_dispatch: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.values().sum()
    }

    /// Record an admission, folding the queue wait into the rolling average.
    pub fn record_dispatch(&mut self, kind: QueryKind, waited: Duration) {
        *self.dispatched.entry(kind).or_default() += 1;
        let count = self.total_dispatched();

        // Incremental mean: new_avg = prev_avg + (waited - prev_avg) / count
        self.avg_queue_wait = if count == 1 {
            waited
        } else {
            let prev_nanos = self.avg_queue_wait.as_nanos() as f64;
            let cur_nanos = waited.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.last_dispatch = Some(Utc::now());
    }

    pub fn record_dedupe(&mut self) {
        self.dedupe_hits += 1;
    }

    pub fn record_cancellations(&mut self, count: usize) {
        self.cancelled += count as u64;
    }

    pub fn record_failure(&mut self) {
        self.transport_failures += 1;
    }
}
