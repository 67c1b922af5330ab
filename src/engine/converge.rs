//! # Convergence
//!
//! The single state machine that drives one object toward its desired state:
//!
//! | live      | desired | action                                   |
//! |-----------|---------|------------------------------------------|
//! | missing   | absent  | nothing                                  |
//! | missing   | present | create with last-applied record and owner |
//! | found     | absent  | delete (already gone counts as success)  |
//! | found     | present | three-way diff, update when non-empty    |
//!
//! An empty diff still writes when the stored last-applied record differs
//! from the desired payload, so the record always names what is managed.
//!
//! A write that loses a concurrency race is retried once against a refetched
//! object. An update the store rejects as invalid is replaced by a delete and a
//! fresh create.

use crate::engine::desired::DesiredState;
use crate::engine::diff::{self, Diff};
use crate::engine::error::ConvergeError;
use crate::engine::object::{ManagedObject, ObjectIdentity, ReconcileOutcome};
use crate::engine::retry::{retry_once_on_conflict, ConflictAware};
use crate::engine::store::{with_resource_version, ObjectStore, StoreError, StoredObject};
use crate::constants::LAST_APPLIED_ANNOTATION;
use crate::observability::metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Where inside a read-modify-write a store call failed
#[derive(Debug)]
enum WriteError {
    Refetch(StoreError),
    Create(StoreError),
    Update(StoreError),
}

impl ConflictAware for WriteError {
    fn is_conflict(&self) -> bool {
        match self {
            Self::Create(e) | Self::Update(e) => e.is_conflict(),
            Self::Refetch(_) => false,
        }
    }
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refetch(e) => write!(f, "refetch: {e}"),
            Self::Create(e) => write!(f, "create: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
        }
    }
}

/// Converge one object in `store` toward `desired`.
pub async fn converge(
    store: &dyn ObjectStore,
    object: &ManagedObject,
    owner: Option<&OwnerReference>,
    desired: DesiredState,
) -> Result<ReconcileOutcome, ConvergeError> {
    let identity = &object.identity;

    let live = store
        .get(identity)
        .await
        .map_err(|source| ConvergeError::FetchFailed {
            identity: identity.clone(),
            source,
        })?;

    let outcome = match (live, desired) {
        (None, DesiredState::Absent) => ReconcileOutcome::NoOp,
        (Some(_), DesiredState::Absent) => delete(store, identity).await?,
        (live, DesiredState::Present) => {
            let payload = render_for_write(object, owner)?;
            write_present(store, identity, &payload, live).await?
        }
    };

    metrics::increment_object_operations(&identity.kind, outcome.as_str());
    if outcome.wrote() {
        info!(kind = %identity.kind, object = %identity, %outcome, "object converged");
    } else {
        debug!(kind = %identity.kind, object = %identity, %desired, "object already converged");
    }
    Ok(outcome)
}

/// Desired payload as it is written: owner reference and last-applied record
/// attached, no concurrency token.
fn render_for_write(
    object: &ManagedObject,
    owner: Option<&OwnerReference>,
) -> Result<Value, ConvergeError> {
    let mut payload = with_resource_version(&object.payload, None);
    if let Some(root) = payload.as_object_mut() {
        root.remove("status");
    }
    if let Some(owner) = owner {
        let reference = serde_json::to_value(owner).map_err(|e| ConvergeError::WriteFailed {
            identity: object.identity.clone(),
            source: StoreError::Payload(e),
        })?;
        if let Some(metadata) = payload.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert(
                "ownerReferences".to_string(),
                Value::Array(vec![reference]),
            );
        }
    }
    diff::record_last_applied(&mut payload).map_err(|e| ConvergeError::WriteFailed {
        identity: object.identity.clone(),
        source: StoreError::Payload(e),
    })?;
    Ok(payload)
}

async fn delete(
    store: &dyn ObjectStore,
    identity: &ObjectIdentity,
) -> Result<ReconcileOutcome, ConvergeError> {
    match store.delete(identity).await {
        Ok(()) => Ok(ReconcileOutcome::Deleted),
        Err(StoreError::NotFound) => {
            debug!(object = %identity, "already deleted");
            Ok(ReconcileOutcome::NoOp)
        }
        Err(source) => Err(ConvergeError::DeleteFailed {
            identity: identity.clone(),
            source,
        }),
    }
}

async fn write_present(
    store: &dyn ObjectStore,
    identity: &ObjectIdentity,
    desired: &Value,
    live: Option<StoredObject>,
) -> Result<ReconcileOutcome, ConvergeError> {
    let initial = &live;
    let result = retry_once_on_conflict("object", |attempt| async move {
        let current = if attempt.is_retry() {
            store.get(identity).await.map_err(WriteError::Refetch)?
        } else {
            initial.clone()
        };
        match current {
            None => store
                .create(identity, desired)
                .await
                .map(|_| ReconcileOutcome::Created)
                .map_err(WriteError::Create),
            Some(current) => update_if_changed(store, identity, &current, desired)
                .await
                .map_err(WriteError::Update),
        }
    })
    .await;

    match result {
        Ok(outcome) => Ok(outcome),
        Err(WriteError::Refetch(source)) => Err(ConvergeError::FetchFailed {
            identity: identity.clone(),
            source,
        }),
        Err(WriteError::Create(source) | WriteError::Update(source)) if source.is_conflict() => {
            Err(ConvergeError::WriteConflict {
                identity: identity.clone(),
                source,
            })
        }
        Err(WriteError::Update(source)) if source.is_invalid() => {
            warn!(object = %identity, error = %source, "update rejected as invalid, recreating");
            recreate(store, identity, desired).await
        }
        Err(WriteError::Create(source) | WriteError::Update(source)) => {
            Err(ConvergeError::WriteFailed {
                identity: identity.clone(),
                source,
            })
        }
    }
}

async fn update_if_changed(
    store: &dyn ObjectStore,
    identity: &ObjectIdentity,
    current: &StoredObject,
    desired: &Value,
) -> Result<ReconcileOutcome, StoreError> {
    let last_applied = diff::last_applied(&current.payload);
    let patch = match diff::should_write(&current.payload, last_applied.as_ref(), desired) {
        Diff::Unchanged if last_applied.as_ref() == Some(&diff::normalize(desired)) => {
            return Ok(ReconcileOutcome::NoOp);
        }
        // Live already matches, but a stale record would later remove fields
        // this payload no longer manages
        Diff::Unchanged => {
            debug!(object = %identity, "refreshing last-applied record");
            Value::Object(serde_json::Map::new())
        }
        Diff::Patch(patch) => patch,
    };
    debug!(object = %identity, %patch, "computed patch");

    let mut merged = current.payload.clone();
    diff::apply_merge_patch(&mut merged, &patch);
    carry_last_applied(&mut merged, desired);

    store
        .update(identity, &merged, current.resource_version.as_deref())
        .await?;
    Ok(ReconcileOutcome::Updated)
}

fn carry_last_applied(target: &mut Value, desired: &Value) {
    let Some(record) = desired
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
        .cloned()
    else {
        return;
    };
    let mut patch = serde_json::Map::new();
    patch.insert(LAST_APPLIED_ANNOTATION.to_string(), record);
    diff::apply_merge_patch(
        target,
        &serde_json::json!({ "metadata": { "annotations": Value::Object(patch) } }),
    );
}

async fn recreate(
    store: &dyn ObjectStore,
    identity: &ObjectIdentity,
    desired: &Value,
) -> Result<ReconcileOutcome, ConvergeError> {
    metrics::increment_invalid_recreations(&identity.kind);

    match store.delete(identity).await {
        Ok(()) | Err(StoreError::NotFound) => {}
        Err(source) => {
            return Err(ConvergeError::DeleteFailed {
                identity: identity.clone(),
                source,
            })
        }
    }

    store
        .create(identity, &with_resource_version(desired, None))
        .await
        .map_err(|source| ConvergeError::WriteInvalid {
            identity: identity.clone(),
            source,
        })?;
    Ok(ReconcileOutcome::Created)
}
