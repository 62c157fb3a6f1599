//! Debounce and throttle timers for expensive, burst-triggered operations
//! (e.g. recompiling a query as the user types).
//!
//! Both guarantee at most one pending timer per id/instance. Neither
//! serializes a callback against a previous callback's own async
//! completion — they bound how often work *starts*, nothing more. Scope an
//! instance per logical owner (one per editable query, say) rather than
//! sharing a global one, and drop it with the owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

struct DebouncerState {
    /// Bumped on every trigger; a firing task only cleans up its own slot
    /// if the generation still matches.
    next_generation: u64,
    timers: HashMap<String, (u64, JoinHandle<()>)>,
}

/// Per-id trailing-edge debouncer: only the last callback registered
/// before the delay elapses is invoked.
pub struct Debouncer {
    state: Arc<Mutex<DebouncerState>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DebouncerState {
                next_generation: 0,
                timers: HashMap::new(),
            })),
        }
    }

    /// (Re)start the delay timer for `id`. Any callback already pending
    /// under this id is discarded.
    pub fn trigger<F>(&self, id: &str, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().expect("debouncer lock poisoned");
        state.next_generation += 1;
        let generation = state.next_generation;
        if let Some((_, previous)) = state.timers.remove(id) {
            trace!(id, "debounce timer restarted");
            previous.abort();
        }

        let id_owned = id.to_string();
        let shared = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut state = shared.lock().expect("debouncer lock poisoned");
                let current = state.timers.get(&id_owned).map(|(gen, _)| *gen);
                if current != Some(generation) {
                    // A newer trigger replaced this timer while it slept.
                    return;
                }
                state.timers.remove(&id_owned);
            }
            callback();
        });
        state.timers.insert(id.to_string(), (generation, handle));
    }

    /// Abort a pending firing. Returns whether one was pending.
    pub fn cancel(&self, id: &str) -> bool {
        let mut state = self.state.lock().expect("debouncer lock poisoned");
        match state.timers.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.state
            .lock()
            .expect("debouncer lock poisoned")
            .timers
            .contains_key(id)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("debouncer lock poisoned");
        for (_, (_, handle)) in state.timers.drain() {
            handle.abort();
        }
    }
}

struct ThrottlerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Single-slot throttler: at most one callback pending; a new call
/// replaces the pending one and restarts the delay.
pub struct Throttler {
    delay: Duration,
    fast_delay: Duration,
    slot: Arc<Mutex<ThrottlerSlot>>,
    throttling: Arc<AtomicBool>,
}

impl Throttler {
    pub fn new(delay: Duration, fast_delay: Duration) -> Self {
        Self {
            delay,
            fast_delay,
            slot: Arc::new(Mutex::new(ThrottlerSlot {
                generation: 0,
                handle: None,
            })),
            throttling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule `callback` after the configured delay, discarding any
    /// callback still pending. `fast` selects the short re-schedule path.
    pub fn throttle<F>(&self, callback: F, fast: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = if fast { self.fast_delay } else { self.delay };
        let mut slot = self.slot.lock().expect("throttler lock poisoned");
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        self.throttling.store(true, Ordering::Release);

        let shared = Arc::clone(&self.slot);
        let throttling = Arc::clone(&self.throttling);
        slot.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut slot = shared.lock().expect("throttler lock poisoned");
                if slot.generation != generation {
                    return;
                }
                slot.handle = None;
                throttling.store(false, Ordering::Release);
            }
            callback();
        }));
    }

    /// Whether a callback is currently pending.
    pub fn is_throttling(&self) -> bool {
        self.throttling.load(Ordering::Acquire)
    }

    /// Discard the pending callback, if any.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().expect("throttler lock poisoned");
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        self.throttling.store(false, Ordering::Release);
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        self.cancel();
    }
}
