//! Request coalescing: callers asking for the same thing share one
//! transport call.
//!
//! The pending set tracks one state per dedupe key from `join` until
//! settle, covering both queued and in-flight entries. On settle the raw
//! result runs through every registered mapper independently, so one
//! mapper's failure does not poison sibling waiters; a transport failure
//! fails all of them.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use querydeck_core::{DedupeKey, SchedulerError, SubjectKey};

/// Per-caller transform applied to the shared raw result.
pub type ResultMapper =
    Box<dyn FnOnce(&serde_json::Value) -> Result<serde_json::Value, SchedulerError> + Send>;

/// Awaitable handle returned from `add_request`. Resolves once, with the
/// mapped result or the error for this caller.
pub type ResultReceiver = oneshot::Receiver<Result<serde_json::Value, SchedulerError>>;

/// Lifecycle of a coalesced request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Waiting in the request queue.
    Queued,
    /// Admitted; a transport call is running.
    InFlight,
}

struct Waiter {
    mapper: ResultMapper,
    tx: oneshot::Sender<Result<serde_json::Value, SchedulerError>>,
}

struct BatchState {
    /// Identifies the transport call this entry belongs to. A key can be
    /// re-pended while a superseded call is still in flight; the epoch
    /// lets `settle` tell the two apart.
    epoch: u64,
    status: BatchStatus,
    /// Set when the subject was torn down after admission; the eventual
    /// result is discarded and waiters get a cancellation instead.
    cancelled: bool,
    waiters: Vec<Waiter>,
}

/// Pending set keyed by dedupe identity.
#[derive(Default)]
pub struct Batcher {
    pending: HashMap<DedupeKey, BatchState>,
    next_epoch: u64,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct pending keys (queued plus in-flight).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self, dedupe: &DedupeKey) -> Option<BatchStatus> {
        self.pending.get(dedupe).map(|state| state.status)
    }

    /// Join the pending entry for this key, creating it if absent.
    ///
    /// Returns the caller's receiver and whether a new entry was created —
    /// only then must the caller enqueue a request; otherwise the ask was
    /// coalesced and no new network unit exists.
    pub fn join(&mut self, dedupe: &DedupeKey, mapper: ResultMapper) -> (ResultReceiver, bool) {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { mapper, tx };

        // A cancelled entry is spent: only waiters that were pending at
        // cancellation time receive the cancellation. Pay those out now and
        // start over; the superseded call's settle is dropped by epoch.
        if self.pending.get(dedupe).is_some_and(|state| state.cancelled) {
            let stale = self.pending.remove(dedupe).expect("entry just observed");
            debug!(dedupe = %dedupe, "replacing cancelled in-flight entry");
            for waiter in stale.waiters {
                let _ = waiter.tx.send(Err(SchedulerError::Cancelled {
                    subject: dedupe.subject.clone(),
                }));
            }
        }

        match self.pending.get_mut(dedupe) {
            Some(state) => {
                state.waiters.push(waiter);
                debug!(dedupe = %dedupe, waiters = state.waiters.len(), "coalesced request");
                (rx, false)
            }
            None => {
                let epoch = self.next_epoch;
                self.next_epoch += 1;
                self.pending.insert(
                    dedupe.clone(),
                    BatchState {
                        epoch,
                        status: BatchStatus::Queued,
                        cancelled: false,
                        waiters: vec![waiter],
                    },
                );
                (rx, true)
            }
        }
    }

    /// Transition a queued entry to in-flight at admission. Returns the
    /// entry's epoch, which the eventual settle must present back.
    pub fn mark_in_flight(&mut self, dedupe: &DedupeKey) -> u64 {
        let state = self
            .pending
            .get_mut(dedupe)
            .expect("admitted entry missing from pending set");
        state.status = BatchStatus::InFlight;
        state.epoch
    }

    /// Fail a not-yet-admitted entry, delivering the error to every waiter.
    pub fn fail(&mut self, dedupe: &DedupeKey, error: SchedulerError) {
        if let Some(state) = self.pending.remove(dedupe) {
            for waiter in state.waiters {
                let _ = waiter.tx.send(Err(error.clone()));
            }
        }
    }

    /// Flag every in-flight entry of a subject as superseded. Their
    /// transport calls run to completion but the results are discarded at
    /// settle time. Returns how many entries were flagged.
    pub fn mark_subject_cancelled(&mut self, subject: &SubjectKey) -> usize {
        let mut flagged = 0;
        for (dedupe, state) in self.pending.iter_mut() {
            if dedupe.subject == *subject
                && state.status == BatchStatus::InFlight
                && !state.cancelled
            {
                state.cancelled = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Settle a completed transport call, fanning the outcome out to every
    /// waiter through its own mapper. Returns the number of waiters served.
    ///
    /// A settle whose epoch no longer matches the pending entry belongs to
    /// a superseded call; its outcome is dropped and the current entry is
    /// left untouched.
    pub fn settle(
        &mut self,
        dedupe: &DedupeKey,
        epoch: u64,
        outcome: Result<serde_json::Value, SchedulerError>,
    ) -> usize {
        match self.pending.get(dedupe) {
            Some(state) if state.epoch == epoch => {}
            _ => {
                debug!(dedupe = %dedupe, "dropped settle for superseded call");
                return 0;
            }
        }
        let state = self
            .pending
            .remove(dedupe)
            .expect("entry just observed under the same borrow");
        let outcome = if state.cancelled {
            Err(SchedulerError::Cancelled {
                subject: dedupe.subject.clone(),
            })
        } else {
            outcome
        };
        let served = state.waiters.len();
        match outcome {
            Ok(raw) => {
                for waiter in state.waiters {
                    let mapped = (waiter.mapper)(&raw);
                    let _ = waiter.tx.send(mapped);
                }
            }
            Err(error) => {
                for waiter in state.waiters {
                    let _ = waiter.tx.send(Err(error.clone()));
                }
            }
        }
        served
    }
}
