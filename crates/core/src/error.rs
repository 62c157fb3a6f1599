//! Scheduler error taxonomy.
//!
//! Only two failures ever reach a waiting caller: the backend call failed,
//! or the owning subject was torn down. Internal invariant violations
//! (corrupted heap state, double settles) are programming defects and panic
//! instead of surfacing here.

use thiserror::Error;

use crate::types::SubjectKey;

/// Failure executing a query against the engine transport.
///
/// The scheduler never retries these; retry policy, if any, belongs to the
/// transport implementation.
#[derive(Debug, Clone, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error delivered to request waiters.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The backend call failed. Propagated to every waiter of the dedupe key.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The owning subject was torn down before (or while) the request ran.
    /// Callers drop these silently; stale work is not a user-visible failure.
    #[error("cancelled: subject {subject} was torn down")]
    Cancelled { subject: SubjectKey },
}

impl SchedulerError {
    /// Whether this error is a cancellation signal rather than a real failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SchedulerError::Cancelled { .. })
    }
}
