//! Converge Ops: the two loops every reconciliation is built from.
//!
//! [`invoke`] issues one remote call per attempt and retries retryable errors
//! at a fixed interval. [`poll_until`] fetches a status until its label is
//! terminal. Both are bounded by a hard deadline measured from the first
//! attempt and both stop at the next remote call once their [`CancelToken`]
//! fires.

#![forbid(unsafe_code)]

use tokio_util::sync::CancellationToken;

mod invoke;
mod poll;

pub use invoke::{invoke, InvokeSpec};
pub use poll::poll_until;

/// Cooperative cancellation shared by every step of one operation.
///
/// Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.inner.cancel(); }

    pub fn is_cancelled(&self) -> bool { self.inner.is_cancelled() }

    /// Resolves once cancelled.
    pub async fn cancelled(&self) { self.inner.cancelled().await }
}
