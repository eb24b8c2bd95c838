use thiserror::Error;

/// Errors reported by the coalescer itself.
///
/// Failures of the aggregate call are not represented here: they are logged
/// by the dispatcher and surface to waiters only as a completion with no data
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoalesceError {
    /// The [`Dispatcher`](crate::Dispatcher) was dropped or has finished, so
    /// nothing will ever service the request.
    #[error("the coalescer's dispatcher is no longer running")]
    Closed,
}
