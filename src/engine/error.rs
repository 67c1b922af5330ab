//! # Engine Errors
//!
//! Every convergence failure names the object it happened on so that the first
//! failing object of a pass can be reported verbatim on the parent status.

use crate::engine::object::ObjectIdentity;
use crate::engine::store::StoreError;
use thiserror::Error;

/// Failure to render a desired object
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{kind} has no metadata.name")]
    MissingName { kind: String },

    #[error("{kind} {name} has no metadata.uid; it cannot own other objects yet")]
    MissingUid { kind: String, name: String },

    #[error("failed to serialize {kind}: {source}")]
    Serialize {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to render {document}: {message}")]
    Template { document: String, message: String },
}

/// Failure while converging one object
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("failed to fetch {identity}: {source}")]
    FetchFailed {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("write conflict on {identity} persisted after refetch: {source}")]
    WriteConflict {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("{identity} was rejected as invalid and could not be recreated: {source}")]
    WriteInvalid {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("failed to write {identity}: {source}")]
    WriteFailed {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete {identity}: {source}")]
    DeleteFailed {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("owner kind {owner_kind} of {identity} is not registered")]
    OwnerUnresolved {
        identity: ObjectIdentity,
        owner_kind: String,
    },

    #[error("no store available for {identity}: {source}")]
    StoreUnavailable {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },
}

impl ConvergeError {
    /// Object the failure happened on
    #[must_use]
    pub fn identity(&self) -> &ObjectIdentity {
        match self {
            Self::FetchFailed { identity, .. }
            | Self::WriteConflict { identity, .. }
            | Self::WriteInvalid { identity, .. }
            | Self::WriteFailed { identity, .. }
            | Self::DeleteFailed { identity, .. }
            | Self::OwnerUnresolved { identity, .. }
            | Self::StoreUnavailable { identity, .. } => identity,
        }
    }

    /// Short label used for metrics
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "fetch_failed",
            Self::WriteConflict { .. } => "write_conflict",
            Self::WriteInvalid { .. } => "write_invalid",
            Self::WriteFailed { .. } => "write_failed",
            Self::DeleteFailed { .. } => "delete_failed",
            Self::OwnerUnresolved { .. } => "owner_unresolved",
            Self::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}
