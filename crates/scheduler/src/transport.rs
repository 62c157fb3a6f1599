//! Engine transport boundary.

use async_trait::async_trait;

use querydeck_core::TransportError;

/// A backend capable of executing one logical query.
///
/// The scheduler calls this concurrently up to its configured concurrency
/// limit. Implementations must not assume any request ordering beyond what
/// the scheduler already enforces, and own their retry policy — a returned
/// error is final from the scheduler's point of view.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn execute(&self, payload: &serde_json::Value)
        -> Result<serde_json::Value, TransportError>;
}
