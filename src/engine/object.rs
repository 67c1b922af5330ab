//! # Managed Objects
//!
//! Identity, payload and ownership of the objects a pass renders.
//!
//! Payloads are opaque JSON documents. The engine never interprets them beyond
//! `metadata` and `status`, which is what lets typed and schema-less objects share
//! one convergence path.

use crate::engine::desired::DesiredState;
use crate::engine::error::RenderError;
use kube::core::ApiResource;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Addressable identity of an object in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Identity of a typed resource instance
    pub fn of<K>(resource: &K) -> Result<Self, RenderError>
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).to_string();
        let name = resource
            .meta()
            .name
            .clone()
            .ok_or_else(|| RenderError::MissingName { kind: kind.clone() })?;
        Ok(Self {
            kind,
            namespace: resource.meta().namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Owner of a managed object, resolved to an owner reference at write time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRelation {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerRelation {
    /// Relation pointing at a parent resource that has been persisted
    pub fn of<P>(parent: &P) -> Result<Self, RenderError>
    where
        P: Resource<DynamicType = ()>,
    {
        let kind = P::kind(&()).to_string();
        let meta = parent.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| RenderError::MissingName { kind: kind.clone() })?;
        let uid = meta.uid.clone().ok_or_else(|| RenderError::MissingUid {
            kind: kind.clone(),
            name: name.clone(),
        })?;
        Ok(Self { kind, name, uid })
    }
}

/// A freshly rendered object; never mutated once built
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    pub identity: ObjectIdentity,
    pub payload: Value,
    pub owner: Option<OwnerRelation>,
}

impl ManagedObject {
    /// Render a compiled resource type into a managed object
    pub fn typed<K>(resource: &K, owner: Option<OwnerRelation>) -> Result<Self, RenderError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let identity = ObjectIdentity::of(resource)?;
        let mut payload = serde_json::to_value(resource).map_err(|source| RenderError::Serialize {
            kind: identity.kind.clone(),
            source,
        })?;
        ensure_type_meta(&mut payload, &K::api_version(&()), &identity.kind);
        Ok(Self {
            identity,
            payload,
            owner,
        })
    }

    /// Wrap a schema-less payload addressed by `resource`
    pub fn dynamic(
        resource: &ApiResource,
        mut payload: Value,
        owner: Option<OwnerRelation>,
    ) -> Result<Self, RenderError> {
        let name = payload
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RenderError::MissingName {
                kind: resource.kind.clone(),
            })?;
        let namespace = payload
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        ensure_type_meta(&mut payload, &resource.api_version, &resource.kind);
        Ok(Self {
            identity: ObjectIdentity {
                kind: resource.kind.clone(),
                namespace,
                name,
            },
            payload,
            owner,
        })
    }
}

fn ensure_type_meta(payload: &mut Value, api_version: &str, kind: &str) {
    if let Some(map) = payload.as_object_mut() {
        map.entry("apiVersion")
            .or_insert_with(|| Value::String(api_version.to_string()));
        map.entry("kind")
            .or_insert_with(|| Value::String(kind.to_string()));
    }
}

/// A schema-less resource addressed by group/version/resource
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicResource {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Where the engine should read and write an object
#[derive(Debug, Clone, PartialEq)]
pub enum StoreTarget {
    /// A compiled type registered in the type registry under this kind
    Kind(String),
    /// A schema-less resource
    Dynamic(DynamicResource),
}

/// One object of a component together with its desired state for this pass
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedObject {
    pub object: ManagedObject,
    pub target: StoreTarget,
    pub desired: DesiredState,
}

impl PlannedObject {
    pub fn typed<K>(
        resource: &K,
        owner: Option<OwnerRelation>,
        desired: DesiredState,
    ) -> Result<Self, RenderError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let object = ManagedObject::typed(resource, owner)?;
        Ok(Self {
            target: StoreTarget::Kind(object.identity.kind.clone()),
            object,
            desired,
        })
    }

    pub fn dynamic(
        resource: &DynamicResource,
        payload: Value,
        owner: Option<OwnerRelation>,
        desired: DesiredState,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            object: ManagedObject::dynamic(&resource.resource, payload, owner)?,
            target: StoreTarget::Dynamic(resource.clone()),
            desired,
        })
    }
}

/// What a single convergence call did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    NoOp,
    Created,
    Updated,
    Deleted,
}

impl ReconcileOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn wrote(self) -> bool {
        self != Self::NoOp
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
