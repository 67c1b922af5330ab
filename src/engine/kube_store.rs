//! # Kubernetes Stores
//!
//! [`ObjectStore`] implementations backed by the Kubernetes API server, for
//! compiled types (`Api<K>`) and schema-less resources (`Api<DynamicObject>`).

use crate::engine::object::{DynamicResource, ObjectIdentity, StoreTarget};
use crate::engine::registry::TypeRegistry;
use crate::engine::store::{
    with_resource_version, ObjectStore, StoreError, StoreProvider, StoredObject,
};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::trace;

fn post_params(field_manager: &str) -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(field_manager.to_string()),
    }
}

fn status_patch(payload: &Value, resource_version: Option<&str>) -> Value {
    let mut patch = json!({ "status": payload.get("status").cloned().unwrap_or(Value::Null) });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

fn stored<T: Serialize>(object: &T) -> Result<StoredObject, StoreError> {
    Ok(StoredObject::from_payload(serde_json::to_value(object)?))
}

/// Store for one compiled resource type
#[derive(Clone)]
pub struct TypedStore<K> {
    api: Api<K>,
    field_manager: String,
}

impl<K> TypedStore<K> {
    pub fn new(api: Api<K>, field_manager: &str) -> Self {
        Self {
            api,
            field_manager: field_manager.to_string(),
        }
    }
}

impl<K> Debug for TypedStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedStore")
            .field("type", &std::any::type_name::<K>())
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<K> ObjectStore for TypedStore<K>
where
    K: kube::Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn get(&self, identity: &ObjectIdentity) -> Result<Option<StoredObject>, StoreError> {
        trace!(%identity, "get");
        self.api
            .get_opt(&identity.name)
            .await?
            .as_ref()
            .map(stored)
            .transpose()
    }

    async fn create(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
    ) -> Result<StoredObject, StoreError> {
        trace!(%identity, "create");
        let object: K = serde_json::from_value(payload.clone())?;
        let created = self
            .api
            .create(&post_params(&self.field_manager), &object)
            .await?;
        stored(&created)
    }

    async fn update(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        trace!(%identity, ?resource_version, "replace");
        let object: K = serde_json::from_value(with_resource_version(payload, resource_version))?;
        let replaced = self
            .api
            .replace(&identity.name, &post_params(&self.field_manager), &object)
            .await?;
        stored(&replaced)
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), StoreError> {
        trace!(%identity, "delete");
        self.api
            .delete(&identity.name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        trace!(%identity, ?resource_version, "patch status");
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        };
        let patched = self
            .api
            .patch_status(
                &identity.name,
                &params,
                &Patch::Merge(status_patch(payload, resource_version)),
            )
            .await?;
        stored(&patched)
    }
}

/// Store for a schema-less resource
#[derive(Clone)]
pub struct DynamicStore {
    api: Api<DynamicObject>,
    kind: String,
    field_manager: String,
}

impl DynamicStore {
    pub fn new(
        client: Client,
        resource: &DynamicResource,
        namespace: Option<&str>,
        field_manager: &str,
    ) -> Self {
        let api = match (resource.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &resource.resource),
            _ => Api::all_with(client, &resource.resource),
        };
        Self {
            api,
            kind: resource.resource.kind.clone(),
            field_manager: field_manager.to_string(),
        }
    }
}

impl Debug for DynamicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicStore")
            .field("kind", &self.kind)
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for DynamicStore {
    async fn get(&self, identity: &ObjectIdentity) -> Result<Option<StoredObject>, StoreError> {
        trace!(%identity, "get");
        self.api
            .get_opt(&identity.name)
            .await?
            .as_ref()
            .map(stored)
            .transpose()
    }

    async fn create(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
    ) -> Result<StoredObject, StoreError> {
        trace!(%identity, "create");
        let object: DynamicObject = serde_json::from_value(payload.clone())?;
        let created = self
            .api
            .create(&post_params(&self.field_manager), &object)
            .await?;
        stored(&created)
    }

    async fn update(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        trace!(%identity, ?resource_version, "replace");
        let object: DynamicObject =
            serde_json::from_value(with_resource_version(payload, resource_version))?;
        let replaced = self
            .api
            .replace(&identity.name, &post_params(&self.field_manager), &object)
            .await?;
        stored(&replaced)
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), StoreError> {
        trace!(%identity, "delete");
        self.api
            .delete(&identity.name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

/// Resolves targets to API-server backed stores
#[derive(Clone)]
pub struct KubeStores {
    client: Client,
    registry: Arc<TypeRegistry>,
    field_manager: String,
}

impl KubeStores {
    pub fn new(client: Client, registry: Arc<TypeRegistry>, field_manager: &str) -> Self {
        Self {
            client,
            registry,
            field_manager: field_manager.to_string(),
        }
    }
}

impl Debug for KubeStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStores")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl StoreProvider for KubeStores {
    fn store_for(
        &self,
        target: &StoreTarget,
        namespace: Option<&str>,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        match target {
            StoreTarget::Kind(kind) => {
                let registered = self
                    .registry
                    .get(kind)
                    .ok_or_else(|| StoreError::UnknownKind(kind.clone()))?;
                Ok(registered
                    .factory()
                    .build(self.client.clone(), namespace, &self.field_manager))
            }
            StoreTarget::Dynamic(resource) => Ok(Arc::new(DynamicStore::new(
                self.client.clone(),
                resource,
                namespace,
                &self.field_manager,
            ))),
        }
    }
}
