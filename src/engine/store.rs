//! # Object Store
//!
//! The capability the engine needs from the backing store: read one object,
//! create, update with an optimistic concurrency token, delete and write status.
//!
//! Kubernetes implementations live in [`crate::engine::kube_store`]. Tests drive
//! the engine with an in-memory implementation of the same trait.

use crate::engine::object::{ObjectIdentity, StoreTarget};
use crate::engine::retry::ConflictAware;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Store-level failure, classified by how the engine must react to it
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    /// Stale concurrency token, or the object already exists on create
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store rejected the payload as structurally invalid
    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("kind {0} is not registered")]
    UnknownKind(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("payload does not match the target type: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

impl ConflictAware for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) => match api_err.code {
                404 => Self::NotFound,
                409 => Self::Conflict(api_err.message),
                422 => Self::Invalid(api_err.message),
                code => Self::Api {
                    code,
                    message: api_err.message,
                },
            },
            kube::Error::SerdeError(e) => Self::Payload(e),
            other => Self::Request(other.to_string()),
        }
    }
}

/// An object as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub payload: Value,
    /// Optimistic concurrency token
    pub resource_version: Option<String>,
}

impl StoredObject {
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        let resource_version = payload
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            payload,
            resource_version,
        }
    }
}

/// Set or clear `metadata.resourceVersion` on a payload
pub fn with_resource_version(payload: &Value, resource_version: Option<&str>) -> Value {
    let mut payload = payload.clone();
    if let Some(root) = payload.as_object_mut() {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            match resource_version {
                Some(rv) => {
                    metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
                }
                None => {
                    metadata.remove("resourceVersion");
                }
            }
        }
    }
    payload
}

/// Read and write access to one kind of object
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, identity: &ObjectIdentity) -> Result<Option<StoredObject>, StoreError>;

    async fn create(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
    ) -> Result<StoredObject, StoreError>;

    /// Replace the object; fails with [`StoreError::Conflict`] when
    /// `resource_version` is stale.
    async fn update(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError>;

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), StoreError>;

    /// Write only the `status` of `payload` through the status subresource.
    ///
    /// Stores without a status subresource report [`StoreError::NotFound`], which
    /// callers treat as "fall back to a whole-object update".
    async fn update_status(
        &self,
        _identity: &ObjectIdentity,
        _payload: &Value,
        _resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        Err(StoreError::NotFound)
    }
}

/// Hands out the store responsible for a target
pub trait StoreProvider: Send + Sync {
    fn store_for(
        &self,
        target: &StoreTarget,
        namespace: Option<&str>,
    ) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
