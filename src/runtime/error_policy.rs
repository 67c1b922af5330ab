//! # Error Policy
//!
//! Requeue policy for failed passes and classification of watch stream errors.

use crate::controller::reconciler::{resource_key, Reconciler, ReconcilerError};
use crate::crd::ManagedParent;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed parent with its own Fibonacci backoff
pub fn handle_reconciliation_error<P: ManagedParent>(
    parent: Arc<P>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let kind = P::kind(&());
    let name = parent.meta().name.as_deref().unwrap_or("unknown");
    let namespace = parent.meta().namespace.as_deref().unwrap_or("default");
    let _span = tracing::error_span!(
        "controller.watch.reconciliation_error",
        resource.kind = kind.as_ref(),
        resource.name = name,
        resource.namespace = namespace,
    )
    .entered();

    error!(error = %error, "reconciliation failed");
    metrics::increment_reconciliation_errors(&kind);

    let (backoff_seconds, error_count) = ctx
        .next_error_backoff(&resource_key(parent.as_ref()))
        .unwrap_or((ctx.config().reconciliation_error_requeue_secs, 0));

    let next_attempt = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        backoff_seconds,
        error_count,
        next_attempt = %next_attempt.to_rfc3339(),
        "retrying with Fibonacci backoff"
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// How the watch loop should treat a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    NotFound,
    Unauthorized,
    Expired,
    Throttled,
    Other,
}

impl WatchErrorKind {
    /// Classify a stream error from its debug rendering.
    ///
    /// 404 is checked before 401: a plain-text 404 body surfaces as a decode
    /// error that also mentions `WatchFailed`.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let not_found = error.contains("ObjectNotFound")
            || error.contains("404")
            || error.contains("not found");
        if not_found {
            return Self::NotFound;
        }
        if error.contains("401") || error.contains("Unauthorized") {
            return Self::Unauthorized;
        }
        if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            return Self::Expired;
        }
        if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            return Self::Throttled;
        }
        Self::Other
    }
}

/// Handle a watch stream error.
///
/// Returns `true` to keep the event in the stream and `false` to drop it and
/// let the stream restart.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> bool {
    let _span = tracing::warn_span!("controller.watch.error", error = %error_string).entered();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404), which is normal after deletion or while the CRDs are missing: {}",
                error_string
            );
            true
        }
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401), RBAC may have been revoked or the token expired");
            error!("   kubectl auth can-i list meshcontrolplanes --as=system:serviceaccount:<namespace>:mesh-operator --all-namespaces");
            warn!(
                "Waiting {}s before retrying watch",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            false
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch resource version expired, restarting watch");
            false
        }
        WatchErrorKind::Throttled => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!(
                "API server throttling or reinitializing storage (429), backing off {}ms",
                current
            );
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            false
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: invalid type: integer `404`, 401"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            WatchErrorKind::classify("Api(ErrorResponse { code: 401, reason: Unauthorized })"),
            WatchErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_classifies_expired_and_throttled() {
        assert_eq!(
            WatchErrorKind::classify("too old resource version: 123"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("code: 429, TooManyRequests"),
            WatchErrorKind::Throttled
        );
        assert_eq!(WatchErrorKind::classify("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test]
    async fn test_throttling_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1);
        let keep = handle_watch_stream_error("429", &backoff, 3, Duration::ZERO).await;
        assert!(!keep);
        assert_eq!(backoff.load(Ordering::Relaxed), 2);

        handle_watch_stream_error("429", &backoff, 3, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }
}
