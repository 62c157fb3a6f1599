//! Pull-based single-producer/single-consumer hand-off stream.
//!
//! Carries discrete units of completed engine-originated work from the
//! engine-facing producer to the client-side applier. The producer never
//! blocks on consumer pace; the consumer suspends cooperatively until an
//! item arrives or the stream is closed, then drains the backlog in FIFO
//! order before suspending again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct Shared<T> {
    state: Mutex<State<T>>,
    available: Notify,
}

struct State<T> {
    backlog: VecDeque<T>,
    closed: bool,
}

/// Create a connected sender/receiver pair.
pub fn completion_channel<T>() -> (CompletionSender<T>, CompletionReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            backlog: VecDeque::new(),
            closed: false,
        }),
        available: Notify::new(),
    });
    (
        CompletionSender {
            shared: Arc::clone(&shared),
        },
        CompletionReceiver { shared },
    )
}

/// Producer half. Dropping it closes the stream.
pub struct CompletionSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionSender<T> {
    /// Append an item to the backlog. Returns `false` (dropping the item)
    /// if the stream was already closed.
    pub fn send(&self, item: T) -> bool {
        let mut state = self.shared.state.lock().expect("channel lock poisoned");
        if state.closed {
            return false;
        }
        state.backlog.push_back(item);
        drop(state);
        self.shared.available.notify_one();
        true
    }

    /// Mark that no further items will arrive. Queued items remain
    /// consumable.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("channel lock poisoned");
        state.closed = true;
        drop(state);
        self.shared.available.notify_waiters();
    }
}

impl<T> Drop for CompletionSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half.
pub struct CompletionReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionReceiver<T> {
    /// Next item in FIFO order; `None` once the stream is closed and fully
    /// drained. Suspends cooperatively while the backlog is empty.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let wakeup = self.shared.available.notified();
            {
                let mut state = self.shared.state.lock().expect("channel lock poisoned");
                if let Some(item) = state.backlog.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            wakeup.await;
        }
    }

    /// Take everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut state = self.shared.state.lock().expect("channel lock poisoned");
        state.backlog.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().expect("channel lock poisoned").closed
    }
}
