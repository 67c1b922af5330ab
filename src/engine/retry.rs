//! # Conflict Retry
//!
//! Read-modify-write helper shared by object writes and status writes.
//!
//! A write that loses an optimistic concurrency race is retried exactly once,
//! after the caller refetches the object. A second conflict is returned to the
//! caller; repeated retries belong to the controller's requeue loop.

use crate::observability::metrics;
use std::future::Future;
use tracing::debug;

/// Errors that can report a lost concurrency race
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

/// Which attempt of a read-modify-write is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Write against the state the caller already holds
    Initial,
    /// Refetch first, then write against the fresh state
    AfterConflict,
}

impl Attempt {
    #[must_use]
    pub fn is_retry(self) -> bool {
        self == Self::AfterConflict
    }
}

/// Run `write`, and run it once more with [`Attempt::AfterConflict`] if the
/// first attempt lost a concurrency race.
///
/// `operation` labels the retry in logs and metrics.
pub async fn retry_once_on_conflict<T, E, F, Fut>(operation: &str, mut write: F) -> Result<T, E>
where
    E: ConflictAware + std::fmt::Display,
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match write(Attempt::Initial).await {
        Err(err) if err.is_conflict() => {
            debug!(operation, error = %err, "write conflict, refetching and retrying once");
            metrics::increment_conflict_retries(operation);
            write(Attempt::AfterConflict).await
        }
        other => other,
    }
}
