//! Two-level request queue: an outer heap of subjects, each holding an
//! inner heap of pending queries.
//!
//! Both levels order by `(priority, enqueue sequence)`: the sequence is
//! global across subjects, and a bucket's outer rank is always the rank of
//! its best contained entry. That keeps dispatch FIFO among equal
//! priorities end-to-end, even as buckets drain and re-enter the outer
//! heap. Activity changes (the user navigating to a different view,
//! focusing a column) recompute contained priorities in place — background
//! queries get promoted without restarting them.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use querydeck_core::{DedupeKey, QueryKind, SubjectKey};

use crate::heap::KeyedHeap;
use crate::priority::PriorityModel;

/// One coalesced pending ask, from enqueue until dispatch.
#[derive(Debug)]
pub struct RequestEntry {
    /// Correlation id for logs only.
    pub id: Uuid,
    pub subject: SubjectKey,
    pub kind: QueryKind,
    pub dedupe: DedupeKey,
    /// Current dispatch priority; mutated by activity changes.
    pub priority: i32,
    /// Queue-wide enqueue sequence; tie-breaks equal priorities in FIFO
    /// order across subjects. Fixed for the entry's lifetime.
    seq: u64,
    /// Opaque request body handed to the transport.
    pub payload: serde_json::Value,
    /// When the entry entered the queue, for wait-time metrics.
    pub enqueued_at: Instant,
}

impl RequestEntry {
    fn new(dedupe: DedupeKey, priority: i32, seq: u64, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: dedupe.subject.clone(),
            kind: dedupe.kind,
            dedupe,
            priority,
            seq,
            payload,
            enqueued_at: Instant::now(),
        }
    }
}

/// Heap rank: dispatch priority first, enqueue order among equals.
type Rank = (i32, u64);

/// Pending queries for one subject. Created lazily on first enqueue,
/// dropped as soon as it empties. Owned exclusively by the queue.
struct SubjectBucket {
    entries: KeyedHeap<DedupeKey, Rank, RequestEntry>,
}

impl SubjectBucket {
    fn new() -> Self {
        Self {
            entries: KeyedHeap::new(),
        }
    }
}

/// Priority-ordered pending set across all subjects.
pub struct RequestQueue {
    model: PriorityModel,
    subjects: KeyedHeap<SubjectKey, Rank, SubjectBucket>,
    /// Subjects currently marked active. Outlives buckets, so activity
    /// applies to queries enqueued later as well.
    active_subjects: HashSet<SubjectKey>,
    /// The focused column, if any: `(subject, fingerprint)`.
    active_field: Option<(SubjectKey, String)>,
    pending: usize,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new(model: PriorityModel) -> Self {
        Self {
            model,
            subjects: KeyedHeap::new(),
            active_subjects: HashSet::new(),
            active_field: None,
            pending: 0,
            next_seq: 0,
        }
    }

    /// Number of entries waiting for dispatch.
    pub fn depth(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn is_subject_active(&self, subject: &SubjectKey) -> bool {
        self.active_subjects.contains(subject)
    }

    /// Priority a query with this key would get right now.
    fn current_priority(&self, dedupe: &DedupeKey) -> i32 {
        let subject_active = self.active_subjects.contains(&dedupe.subject);
        let field_active = match (&self.active_field, &dedupe.fingerprint) {
            (Some((subject, field)), Some(fp)) => *subject == dedupe.subject && field == fp,
            _ => false,
        };
        self.model.priority(dedupe.kind, subject_active, field_active)
    }

    /// Enqueue a query. The caller (the batcher) guarantees the dedupe key
    /// is not already queued or in flight.
    pub fn enqueue(&mut self, dedupe: DedupeKey, payload: serde_json::Value) {
        let priority = self.current_priority(&dedupe);
        let seq = self.next_seq;
        self.next_seq += 1;
        let subject = dedupe.subject.clone();
        let entry = RequestEntry::new(dedupe, priority, seq, payload);

        debug!(
            id = %entry.id,
            dedupe = %entry.dedupe,
            priority,
            "enqueued query"
        );

        if !self.subjects.contains(&subject) {
            self.subjects
                .push(subject.clone(), (priority, seq), SubjectBucket::new());
        }
        let bucket = self
            .subjects
            .get_mut(&subject)
            .expect("subject bucket just ensured");
        bucket.entries.push(entry.dedupe.clone(), (priority, seq), entry);
        let best = bucket
            .entries
            .peek_priority()
            .expect("bucket non-empty after push");
        self.subjects.reprioritize(&subject, best);
        self.pending += 1;
    }

    /// Pop the globally most urgent entry, or `None` when nothing pends.
    pub fn dequeue_next(&mut self) -> Option<RequestEntry> {
        let (subject, mut bucket) = self.subjects.pop()?;
        let (_, entry) = bucket
            .entries
            .pop()
            .expect("bucket held by outer heap is never empty");
        if !bucket.entries.is_empty() {
            let best = bucket
                .entries
                .peek_priority()
                .expect("bucket checked non-empty");
            self.subjects.push(subject, best, bucket);
        }
        self.pending -= 1;
        Some(entry)
    }

    /// Flag a subject as the user's current view, promoting all its
    /// pending queries.
    pub fn mark_subject_active(&mut self, subject: &SubjectKey) {
        if !self.active_subjects.insert(subject.clone()) {
            return;
        }
        debug!(subject = %subject, "subject active");
        self.refresh_subject(subject);
    }

    /// Drop a subject's active flag, demoting its pending queries.
    pub fn mark_subject_inactive(&mut self, subject: &SubjectKey) {
        if !self.active_subjects.remove(subject) {
            return;
        }
        debug!(subject = %subject, "subject inactive");
        self.refresh_subject(subject);
    }

    /// Focus a column: queries fingerprinted with it get the field boost.
    pub fn mark_field_active(&mut self, subject: &SubjectKey, fingerprint: &str) {
        let previous = self
            .active_field
            .replace((subject.clone(), fingerprint.to_string()));
        if let Some((prev_subject, _)) = previous {
            if prev_subject != *subject {
                self.refresh_subject(&prev_subject);
            }
        }
        self.refresh_subject(subject);
    }

    /// Clear the focused column, if any.
    pub fn clear_field_active(&mut self) {
        if let Some((subject, _)) = self.active_field.take() {
            self.refresh_subject(&subject);
        }
    }

    /// Tear down a subject: remove its bucket and hand back every pending
    /// entry so the caller can fail each waiter with a cancellation signal.
    /// Entries already past admission are not affected here.
    pub fn cancel_subject(&mut self, subject: &SubjectKey) -> Vec<RequestEntry> {
        let Some(mut bucket) = self.subjects.remove(subject) else {
            return Vec::new();
        };
        let mut entries = Vec::with_capacity(bucket.entries.len());
        while let Some((_, entry)) = bucket.entries.pop() {
            entries.push(entry);
        }
        self.pending -= entries.len();
        debug!(subject = %subject, count = entries.len(), "cancelled pending queries");
        entries
    }

    /// Recompute every contained entry's priority after an activity change
    /// and restore both heap levels in place.
    fn refresh_subject(&mut self, subject: &SubjectKey) {
        let Some(keys) = self
            .subjects
            .get(subject)
            .map(|bucket| bucket.entries.keys().cloned().collect::<Vec<_>>())
        else {
            return;
        };
        for key in keys {
            let priority = self.current_priority(&key);
            let bucket = self
                .subjects
                .get_mut(subject)
                .expect("bucket present while refreshing");
            let Some(entry) = bucket.entries.get_mut(&key) else {
                continue;
            };
            entry.priority = priority;
            // The sequence is fixed, so ties keep their enqueue order.
            let rank = (priority, entry.seq);
            bucket.entries.reprioritize(&key, rank);
        }
        if let Some(best) = self
            .subjects
            .get(subject)
            .and_then(|bucket| bucket.entries.peek_priority())
        {
            self.subjects.reprioritize(subject, best);
        }
    }
}
