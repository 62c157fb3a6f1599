//! Client-side interactive query scheduler.
//!
//! Sits between UI call sites and a concurrency-limited query engine:
//! priority-ordered dispatch with admission control, request coalescing,
//! cooperative cancellation, and debounce/throttle primitives for
//! expensive re-executions. The engine itself, the wire transport and the
//! UI are external collaborators behind the [`QueryTransport`] trait and
//! the activity-signal methods on [`QueryScheduler`].

pub mod batcher;
pub mod channel;
pub mod dispatch;
pub mod heap;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod throttle;
pub mod transport;

pub use batcher::{BatchStatus, Batcher, ResultMapper, ResultReceiver};
pub use channel::{completion_channel, CompletionReceiver, CompletionSender};
pub use dispatch::QueryScheduler;
pub use heap::KeyedHeap;
pub use metrics::SchedulerMetrics;
pub use priority::{PriorityModel, QueryKindRegistry, DEFAULT_BASE_PRIORITY};
pub use queue::{RequestEntry, RequestQueue};
pub use throttle::{Debouncer, Throttler};
pub use transport::QueryTransport;
