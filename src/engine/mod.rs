//! # Convergence Engine
//!
//! Generic desired-state reconciliation against an optimistically versioned
//! object store.
//!
//! - [`desired`] - AND-composed feature switches to `Present`/`Absent`
//! - [`diff`] - three-way diff and JSON merge patch
//! - [`converge`] - create/update/delete state machine with one conflict retry
//! - [`reconciler`] - typed and dynamic front-ends sharing that state machine
//! - [`store`], [`kube_store`] - the store capability and its API-server backing
//! - [`registry`] - kind to API coordinates, used for owner references

pub mod converge;
pub mod desired;
pub mod diff;
pub mod error;
pub mod kube_store;
pub mod object;
pub mod reconciler;
pub mod registry;
pub mod retry;
pub mod store;

pub use desired::{resolve, DesiredState, Flag};
pub use error::{ConvergeError, RenderError};
pub use object::{
    DynamicResource, ManagedObject, ObjectIdentity, OwnerRelation, PlannedObject,
    ReconcileOutcome, StoreTarget,
};
pub use reconciler::{DynamicReconciler, Engine, ObjectReconciler};
pub use registry::TypeRegistry;
pub use store::{ObjectStore, StoreError, StoreProvider, StoredObject};
