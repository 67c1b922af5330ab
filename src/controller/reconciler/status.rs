//! # Status State Machine
//!
//! The only writer of parent status.
//!
//! Writes go through the status subresource. A store without one (reported as
//! `NotFound` on that path) gets a whole-object write instead. A write that
//! loses a concurrency race refetches the parent, reapplies only the status
//! fields and retries once.

use crate::crd::{ConfigState, LifecycleStatus, ManagedParent};
use crate::engine::error::RenderError;
use crate::engine::object::ObjectIdentity;
use crate::engine::retry::{retry_once_on_conflict, Attempt, ConflictAware};
use crate::engine::store::{ObjectStore, StoreError, StoredObject};
use crate::observability::metrics;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("{identity} cannot move from {from} to {to}")]
    InvalidTransition {
        identity: ObjectIdentity,
        from: ConfigState,
        to: ConfigState,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("failed to write status of {identity}: {source}")]
    Write {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("failed to decode {identity} after status write: {source}")]
    Decode {
        identity: ObjectIdentity,
        #[source]
        source: serde_json::Error,
    },
}

impl ConflictAware for StatusError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Write { source, .. } if source.is_conflict())
    }
}

/// Requested status of a parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: ConfigState,
    pub message: Option<String>,
    /// `None` keeps the addresses already recorded
    pub addresses: Option<Vec<String>>,
}

impl StatusUpdate {
    #[must_use]
    pub fn new(state: ConfigState) -> Self {
        Self {
            state,
            message: None,
            addresses: None,
        }
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn addresses(mut self, addresses: Vec<String>) -> Self {
        self.addresses = Some(addresses);
        self
    }
}

/// Whether a pass over `parent` should first record `Reconciling`
///
/// A parent that already failed on its current generation keeps the failure
/// recorded while it is retried.
pub fn needs_reconciling<P: ManagedParent>(parent: &P) -> bool {
    let Some(status) = parent.lifecycle() else {
        return true;
    };
    match status.state {
        None | Some(ConfigState::Created | ConfigState::Unmanaged) => true,
        Some(ConfigState::Reconciling | ConfigState::Available | ConfigState::ReconcileFailed) => {
            parent.meta().generation != status.observed_generation
        }
    }
}

/// Status the parent would carry after `update`, or `None` when nothing changes
fn next_status(
    current: &LifecycleStatus,
    update: &StatusUpdate,
    generation: Option<i64>,
) -> Option<LifecycleStatus> {
    let mut next = current.clone();
    next.state = Some(update.state);
    next.error_message.clone_from(&update.message);
    if let Some(addresses) = &update.addresses {
        next.addresses.clone_from(addresses);
    }
    if matches!(
        update.state,
        ConfigState::Available | ConfigState::ReconcileFailed
    ) {
        next.observed_generation = generation;
    }

    let unchanged = next.state == current.state
        && next.error_message == current.error_message
        && next.addresses == current.addresses
        && next.observed_generation == current.observed_generation;
    if unchanged {
        return None;
    }
    if next.state != current.state {
        next.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
    }
    Some(next)
}

#[derive(Clone, Copy)]
pub struct StatusStateMachine<'a> {
    store: &'a dyn ObjectStore,
}

impl std::fmt::Debug for StatusStateMachine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStateMachine").finish_non_exhaustive()
    }
}

impl<'a> StatusStateMachine<'a> {
    /// `store` must hold objects of the parent's kind
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Move `parent` to `update.state`.
    ///
    /// Returns `false` when the status already matched and nothing was written.
    /// On success `parent` is replaced by the stored object.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Fails on an invalid transition or when the store rejects the write"
    )]
    pub async fn set_status<P: ManagedParent>(
        &self,
        parent: &mut P,
        update: StatusUpdate,
    ) -> Result<bool, StatusError> {
        let identity = ObjectIdentity::of(&*parent)?;
        let current = parent.lifecycle().cloned().unwrap_or_default();

        if let Some(from) = current.state {
            if !from.can_transition_to(update.state) {
                return Err(StatusError::InvalidTransition {
                    identity,
                    from,
                    to: update.state,
                });
            }
        }

        let Some(next) = next_status(&current, &update, parent.meta().generation) else {
            debug!(object = %identity, state = %update.state, "status unchanged, skipping write");
            return Ok(false);
        };

        let status_value = serde_json::to_value(&next).map_err(|source| StatusError::Decode {
            identity: identity.clone(),
            source,
        })?;
        *parent.lifecycle_mut() = next;
        let payload = serde_json::to_value(&*parent).map_err(|source| StatusError::Decode {
            identity: identity.clone(),
            source,
        })?;
        let token = parent.meta().resource_version.clone();

        let stored = retry_once_on_conflict("status", |attempt| {
            let identity = &identity;
            let payload = &payload;
            let status_value = &status_value;
            let token = token.clone();
            async move {
                match attempt {
                    Attempt::Initial => {
                        self.write(identity, payload, token.as_deref()).await
                    }
                    Attempt::AfterConflict => {
                        let live = self.refetch(identity).await?;
                        let mut fresh = live.payload;
                        fresh["status"] = status_value.clone();
                        self.write(identity, &fresh, live.resource_version.as_deref())
                            .await
                    }
                }
            }
        })
        .await?;

        *parent = restore_type_meta::<P>(stored.payload).map_err(|source| StatusError::Decode {
            identity: identity.clone(),
            source,
        })?;
        metrics::increment_status_updates(update.state.as_str());
        info!(object = %identity, state = %update.state, "status updated");
        Ok(true)
    }

    async fn write(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        token: Option<&str>,
    ) -> Result<StoredObject, StatusError> {
        let written = match self.store.update_status(identity, payload, token).await {
            Err(e) if e.is_not_found() => {
                debug!(object = %identity, "no status subresource, writing whole object");
                self.store.update(identity, payload, token).await
            }
            other => other,
        };
        written.map_err(|source| StatusError::Write {
            identity: identity.clone(),
            source,
        })
    }

    async fn refetch(&self, identity: &ObjectIdentity) -> Result<StoredObject, StatusError> {
        let live = self
            .store
            .get(identity)
            .await
            .map_err(|source| StatusError::Write {
                identity: identity.clone(),
                source,
            })?;
        live.ok_or_else(|| StatusError::Write {
            identity: identity.clone(),
            source: StoreError::NotFound,
        })
    }
}

/// Decode a stored parent, restoring `apiVersion`/`kind` the write path may
/// have dropped
fn restore_type_meta<P: ManagedParent>(mut payload: Value) -> Result<P, serde_json::Error> {
    if let Some(root) = payload.as_object_mut() {
        root.entry("apiVersion")
            .or_insert_with(|| Value::String(P::api_version(&()).to_string()));
        root.entry("kind")
            .or_insert_with(|| Value::String(P::kind(&()).to_string()));
    }
    serde_json::from_value(payload)
}
