//! # Type Registry
//!
//! Maps a kind name to its API coordinates and to a factory for its store.
//!
//! Owner relations are stored as plain `(kind, name, uid)` tuples; the registry
//! turns them into owner references when an object is written. The registry is
//! built once at start-up and shared read-only.

use crate::engine::kube_store::{DynamicStore, TypedStore};
use crate::engine::object::{DynamicResource, OwnerRelation};
use crate::engine::store::ObjectStore;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DynamicObject};
use kube::core::ApiResource;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// Builds a store bound to one namespace (or the whole cluster)
pub trait StoreFactory: Send + Sync {
    fn build(
        &self,
        client: Client,
        namespace: Option<&str>,
        field_manager: &str,
    ) -> Arc<dyn ObjectStore>;
}

struct NamespacedFactory<K>(PhantomData<fn() -> K>);

impl<K> StoreFactory for NamespacedFactory<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    fn build(
        &self,
        client: Client,
        namespace: Option<&str>,
        field_manager: &str,
    ) -> Arc<dyn ObjectStore> {
        let api = match namespace {
            Some(ns) => Api::<K>::namespaced(client, ns),
            None => Api::<K>::all(client),
        };
        Arc::new(TypedStore::new(api, field_manager))
    }
}

struct ClusterFactory<K>(PhantomData<fn() -> K>);

impl<K> StoreFactory for ClusterFactory<K>
where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    fn build(
        &self,
        client: Client,
        _namespace: Option<&str>,
        field_manager: &str,
    ) -> Arc<dyn ObjectStore> {
        Arc::new(TypedStore::new(Api::<K>::all(client), field_manager))
    }
}

struct DynamicFactory(DynamicResource);

impl StoreFactory for DynamicFactory {
    fn build(
        &self,
        client: Client,
        namespace: Option<&str>,
        field_manager: &str,
    ) -> Arc<dyn ObjectStore> {
        Arc::new(DynamicStore::new(client, &self.0, namespace, field_manager))
    }
}

/// A kind the operator knows how to address
#[derive(Clone)]
pub struct RegisteredKind {
    pub resource: ApiResource,
    pub namespaced: bool,
    factory: Arc<dyn StoreFactory>,
}

impl RegisteredKind {
    #[must_use]
    pub fn factory(&self) -> &dyn StoreFactory {
        self.factory.as_ref()
    }
}

impl Debug for RegisteredKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredKind")
            .field("api_version", &self.resource.api_version)
            .field("kind", &self.resource.kind)
            .field("namespaced", &self.namespaced)
            .finish_non_exhaustive()
    }
}

/// Kind name to API coordinates
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: BTreeMap<String, RegisteredKind>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled namespaced type
    #[must_use]
    pub fn with_namespaced<K>(mut self) -> Self
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            ApiResource::erase::<K>(&()),
            true,
            Arc::new(NamespacedFactory::<K>(PhantomData)),
        );
        self
    }

    /// Register a compiled cluster-scoped type
    #[must_use]
    pub fn with_cluster<K>(mut self) -> Self
    where
        K: Resource<DynamicType = (), Scope = ClusterResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            ApiResource::erase::<K>(&()),
            false,
            Arc::new(ClusterFactory::<K>(PhantomData)),
        );
        self
    }

    /// Register a schema-less resource so it can be looked up by kind
    #[must_use]
    pub fn with_dynamic(mut self, resource: &DynamicResource) -> Self {
        self.insert(
            resource.resource.clone(),
            resource.namespaced,
            Arc::new(DynamicFactory(resource.clone())),
        );
        self
    }

    fn insert(&mut self, resource: ApiResource, namespaced: bool, factory: Arc<dyn StoreFactory>) {
        self.kinds.insert(
            resource.kind.clone(),
            RegisteredKind {
                resource,
                namespaced,
                factory,
            },
        );
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&RegisteredKind> {
        self.kinds.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Controller owner reference for `owner`, or `None` when its kind is unknown
    #[must_use]
    pub fn owner_reference(&self, owner: &OwnerRelation) -> Option<OwnerReference> {
        let registered = self.get(&owner.kind)?;
        Some(OwnerReference {
            api_version: registered.resource.api_version.clone(),
            kind: registered.resource.kind.clone(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}
