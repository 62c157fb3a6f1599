//! Stable keyed binary min-heap.
//!
//! Backs both levels of the request queue: the outer heap of subjects and
//! each subject's inner heap of pending queries. Besides the usual
//! push/pop/peek, it supports remove and reprioritize by key through an
//! index map that is kept in sync on every sift swap. Elements with equal
//! priority pop in insertion order, which is what makes dispatch order
//! deterministic and fair among same-priority requests.

use std::collections::HashMap;
use std::hash::Hash;

struct Slot<K, P, T> {
    key: K,
    priority: P,
    /// Insertion counter, used only as a tie-break. Never a priority.
    seq: u64,
    value: T,
}

/// Min-heap keyed by `K`, ordered by `(P, insertion order)`.
pub struct KeyedHeap<K, P, T> {
    slots: Vec<Slot<K, P, T>>,
    index: HashMap<K, usize>,
    next_seq: u64,
}

impl<K, P, T> KeyedHeap<K, P, T>
where
    K: Eq + Hash + Clone,
    P: Ord + Copy,
{
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Keys of all held elements, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().map(|slot| &slot.key)
    }

    /// Insert a new element. The key must not already be present; a
    /// duplicate push indicates a dedupe bug upstream and panics.
    pub fn push(&mut self, key: K, priority: P, value: T) {
        assert!(
            !self.index.contains_key(&key),
            "duplicate key pushed into keyed heap"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        let at = self.slots.len();
        self.index.insert(key.clone(), at);
        self.slots.push(Slot {
            key,
            priority,
            seq,
            value,
        });
        self.sift_up(at);
    }

    /// The best (lowest-priority) element without removing it.
    pub fn peek(&self) -> Option<(&K, &T)> {
        self.slots.first().map(|slot| (&slot.key, &slot.value))
    }

    /// Priority of the best element.
    pub fn peek_priority(&self) -> Option<P> {
        self.slots.first().map(|slot| slot.priority)
    }

    /// Current priority of the element with the given key.
    pub fn priority_of(&self, key: &K) -> Option<P> {
        self.index.get(key).map(|&at| self.slots[at].priority)
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.index.get(key).map(|&at| &self.slots[at].value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        let at = *self.index.get(key)?;
        Some(&mut self.slots[at].value)
    }

    /// Remove and return the best element.
    pub fn pop(&mut self) -> Option<(K, T)> {
        self.remove_at(0)
    }

    /// Remove the element with the given key. Unknown keys are a no-op.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let at = *self.index.get(key)?;
        self.remove_at(at).map(|(_, value)| value)
    }

    /// Change an element's priority in place, restoring the heap invariant.
    /// Returns `false` for unknown keys. The element keeps its original
    /// insertion order for tie-breaking.
    pub fn reprioritize(&mut self, key: &K, priority: P) -> bool {
        let Some(&at) = self.index.get(key) else {
            return false;
        };
        self.slots[at].priority = priority;
        let at = self.sift_up(at);
        self.sift_down(at);
        true
    }

    fn remove_at(&mut self, at: usize) -> Option<(K, T)> {
        if at >= self.slots.len() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.swap_slots(at, last);
        let slot = self.slots.pop().expect("slot vec non-empty after bounds check");
        self.index.remove(&slot.key);
        if at < self.slots.len() {
            // The displaced element may belong either above or below.
            let at = self.sift_up(at);
            self.sift_down(at);
        }
        Some((slot.key, slot.value))
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (sa, sb) = (&self.slots[a], &self.slots[b]);
        (sa.priority, sa.seq) < (sb.priority, sb.seq)
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        self.index.insert(self.slots[a].key.clone(), a);
        self.index.insert(self.slots[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut at: usize) -> usize {
        while at > 0 {
            let parent = (at - 1) / 2;
            if !self.less(at, parent) {
                break;
            }
            self.swap_slots(at, parent);
            at = parent;
        }
        at
    }

    fn sift_down(&mut self, mut at: usize) -> usize {
        loop {
            let left = 2 * at + 1;
            let right = 2 * at + 2;
            let mut best = at;
            if left < self.slots.len() && self.less(left, best) {
                best = left;
            }
            if right < self.slots.len() && self.less(right, best) {
                best = right;
            }
            if best == at {
                return at;
            }
            self.swap_slots(at, best);
            at = best;
        }
    }
}

impl<K, P, T> Default for KeyedHeap<K, P, T>
where
    K: Eq + Hash + Clone,
    P: Ord + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
