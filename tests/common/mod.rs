//! Common test utilities for engine and reconciler tests
//!
//! Provides an in-memory object store that behaves like the API server where the
//! engine cares about it:
//!
//! - uid, generation and resourceVersion assignment
//! - optimistic concurrency on update and status writes
//! - status preserved across whole-object updates
//! - a few server-side defaults (so diffs see fields nobody declared)
//! - one-shot scripted failures, concurrent writers and a call log

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use mesh_operator::components;
use mesh_operator::crd::{MeshControlPlane, MeshControlPlaneSpec, MeshGateway};
use mesh_operator::engine::diff::apply_merge_patch;
use mesh_operator::engine::{
    Engine, ObjectIdentity, ObjectStore, StoreError, StoreProvider, StoreTarget, StoredObject,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "mesh-system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// Error a scripted failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Conflict,
    Invalid,
    NotFound,
    Unavailable,
}

impl Failure {
    fn into_error(self) -> StoreError {
        match self {
            Self::Conflict => StoreError::Conflict("the object has been modified".to_string()),
            Self::Invalid => StoreError::Invalid("field is immutable".to_string()),
            Self::NotFound => StoreError::NotFound,
            Self::Unavailable => StoreError::Api {
                code: 503,
                message: "service unavailable".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub kind: String,
    pub name: String,
}

type Key = (String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    failures: Vec<(Op, String, Failure)>,
    interference: Vec<(Op, String, Value)>,
    calls: Vec<Call>,
}

/// In-memory store shared by every kind; cheap to clone
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    status_subresource: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(identity: &ObjectIdentity) -> Key {
    (
        identity.kind.clone(),
        identity.namespace.clone().unwrap_or_default(),
        identity.name.clone(),
    )
}

fn token(payload: &Value) -> Option<String> {
    payload
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn server_defaults(kind: &str, payload: &mut Value, version: u64) {
    match kind {
        "Deployment" => {
            if let Some(spec) = payload.get_mut("spec").and_then(Value::as_object_mut) {
                spec.entry("progressDeadlineSeconds").or_insert(json!(600));
            }
            if let Some(containers) = payload
                .pointer_mut("/spec/template/spec/containers")
                .and_then(Value::as_array_mut)
            {
                for container in containers.iter_mut().filter_map(Value::as_object_mut) {
                    container
                        .entry("imagePullPolicy")
                        .or_insert(json!("IfNotPresent"));
                }
            }
        }
        "Service" => {
            if let Some(spec) = payload.get_mut("spec").and_then(Value::as_object_mut) {
                spec.entry("clusterIP")
                    .or_insert(json!(format!("10.96.0.{}", version % 250 + 1)));
            }
        }
        _ => {}
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            status_subresource: true,
        }
    }

    /// A store whose status writes report `NotFound`, like a kind without a
    /// status subresource
    pub fn without_status_subresource() -> Self {
        Self {
            status_subresource: false,
            ..Self::new()
        }
    }

    /// Fail the next `op` on `kind` with `failure`
    pub fn fail_next(&self, op: Op, kind: &str, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((op, kind.to_string(), failure));
    }

    /// Right after the next `op` on `kind` answers, another writer merges
    /// `patch` into that object and bumps its resourceVersion
    pub fn interfere_after_next(&self, op: Op, kind: &str, patch: Value) {
        self.state
            .lock()
            .unwrap()
            .interference
            .push((op, kind.to_string(), patch));
    }

    fn interfere(&self, op: Op, identity: &ObjectIdentity) {
        let patch = {
            let mut state = self.state.lock().unwrap();
            let index = state
                .interference
                .iter()
                .position(|(o, kind, _)| *o == op && *kind == identity.kind);
            index.map(|index| state.interference.remove(index).2)
        };
        if let Some(patch) = patch {
            self.tamper(
                &identity.kind,
                identity.namespace.as_deref(),
                &identity.name,
                &patch,
            );
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Every call except reads, as `"op Kind/name"`
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op != Op::Get)
            .map(|c| format!("{:?} {}/{}", c.op, c.kind, c.name).to_lowercase())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(k, _, _)| k == kind)
            .count()
    }

    /// Raw payload of an object
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(
                kind.to_string(),
                namespace.unwrap_or_default().to_string(),
                name.to_string(),
            ))
            .cloned()
    }

    /// Typed view of an object
    pub fn typed<K: DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<K> {
        self.object(kind, namespace, name)
            .map(|payload| serde_json::from_value(payload).unwrap())
    }

    /// Change an object behind the engine's back, the way another writer would
    pub fn tamper(&self, kind: &str, namespace: Option<&str>, name: &str, patch: &Value) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        let object = state
            .objects
            .get_mut(&(
                kind.to_string(),
                namespace.unwrap_or_default().to_string(),
                name.to_string(),
            ))
            .unwrap_or_else(|| panic!("{kind} {name} does not exist"));
        apply_merge_patch(object, patch);
        object["metadata"]["resourceVersion"] = json!(version.to_string());
    }

    /// Insert `resource` as if a user had applied it and return the stored copy
    pub fn seed<K>(&self, resource: &K) -> K
    where
        K: kube::Resource<DynamicType = ()> + serde::Serialize + DeserializeOwned,
    {
        let identity = ObjectIdentity::of(resource).unwrap();
        let mut payload = serde_json::to_value(resource).unwrap();
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        let metadata = &mut payload["metadata"];
        metadata["uid"] = json!(format!("uid-{version}"));
        metadata["generation"] = json!(1);
        metadata["resourceVersion"] = json!(version.to_string());
        state.objects.insert(key(&identity), payload.clone());
        serde_json::from_value(payload).unwrap()
    }

    fn take_failure(&self, op: Op, identity: &ObjectIdentity) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            op,
            kind: identity.kind.clone(),
            name: identity.name.clone(),
        });
        let scripted = state
            .failures
            .iter()
            .position(|(o, kind, _)| *o == op && *kind == identity.kind);
        match scripted {
            Some(index) => Err(state.failures.remove(index).2.into_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, identity: &ObjectIdentity) -> Result<Option<StoredObject>, StoreError> {
        self.take_failure(Op::Get, identity)?;
        let found = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&key(identity))
            .cloned();
        self.interfere(Op::Get, identity);
        Ok(found.map(StoredObject::from_payload))
    }

    async fn create(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
    ) -> Result<StoredObject, StoreError> {
        self.take_failure(Op::Create, identity)?;
        let mut state = self.state.lock().unwrap();
        if state.objects.contains_key(&key(identity)) {
            return Err(StoreError::Conflict(format!("{identity} already exists")));
        }
        state.version += 1;
        let version = state.version;
        let mut stored = payload.clone();
        let metadata = &mut stored["metadata"];
        metadata["uid"] = json!(format!("uid-{version}"));
        metadata["generation"] = json!(1);
        metadata["resourceVersion"] = json!(version.to_string());
        server_defaults(&identity.kind, &mut stored, version);
        state.objects.insert(key(identity), stored.clone());
        Ok(StoredObject::from_payload(stored))
    }

    async fn update(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        self.take_failure(Op::Update, identity)?;
        let mut state = self.state.lock().unwrap();
        let Some(live) = state.objects.get(&key(identity)).cloned() else {
            return Err(StoreError::NotFound);
        };
        if resource_version.is_some_and(|rv| Some(rv) != token(&live).as_deref()) {
            return Err(StoreError::Conflict(format!("{identity} has been modified")));
        }
        state.version += 1;
        let version = state.version;

        let mut stored = payload.clone();
        let generation = live["metadata"]["generation"].as_i64().unwrap_or(1);
        let generation = if live.get("spec") == stored.get("spec") {
            generation
        } else {
            generation + 1
        };
        let metadata = &mut stored["metadata"];
        metadata["uid"] = live["metadata"]["uid"].clone();
        metadata["generation"] = json!(generation);
        metadata["resourceVersion"] = json!(version.to_string());
        if self.status_subresource {
            match live.get("status") {
                Some(status) => stored["status"] = status.clone(),
                None => {
                    if let Some(root) = stored.as_object_mut() {
                        root.remove("status");
                    }
                }
            }
        }
        server_defaults(&identity.kind, &mut stored, version);
        state.objects.insert(key(identity), stored.clone());
        Ok(StoredObject::from_payload(stored))
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), StoreError> {
        self.take_failure(Op::Delete, identity)?;
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .remove(&key(identity))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn update_status(
        &self,
        identity: &ObjectIdentity,
        payload: &Value,
        resource_version: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        if !self.status_subresource {
            return Err(StoreError::NotFound);
        }
        self.take_failure(Op::UpdateStatus, identity)?;
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        let Some(live) = state.objects.get_mut(&key(identity)) else {
            return Err(StoreError::NotFound);
        };
        if resource_version.is_some_and(|rv| Some(rv) != token(live).as_deref()) {
            return Err(StoreError::Conflict(format!("{identity} has been modified")));
        }
        live["status"] = payload.get("status").cloned().unwrap_or(Value::Null);
        live["metadata"]["resourceVersion"] = json!(version.to_string());

        // The status endpoint answers without type metadata
        let mut answer = live.clone();
        if let Some(root) = answer.as_object_mut() {
            root.remove("apiVersion");
            root.remove("kind");
        }
        Ok(StoredObject::from_payload(answer))
    }
}

impl StoreProvider for MemoryStore {
    fn store_for(
        &self,
        _target: &StoreTarget,
        _namespace: Option<&str>,
    ) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(Arc::new(self.clone()))
    }
}

/// Engine over `store` knowing every kind the components render
pub fn engine(store: &MemoryStore) -> Engine {
    Engine::new(
        Arc::new(components::type_registry()),
        Arc::new(store.clone()),
    )
}

/// A `MeshControlPlane` named `mesh`, not yet stored
pub fn control_plane(configure: impl FnOnce(&mut MeshControlPlaneSpec)) -> MeshControlPlane {
    let mut spec = MeshControlPlaneSpec::default();
    configure(&mut spec);
    let mut parent = MeshControlPlane::new("mesh", spec);
    parent.metadata.namespace = Some(NAMESPACE.to_string());
    parent
}

pub fn stored_control_plane(store: &MemoryStore) -> MeshControlPlane {
    store
        .typed("MeshControlPlane", Some(NAMESPACE), "mesh")
        .expect("control plane is stored")
}

pub fn stored_gateway(store: &MemoryStore, name: &str) -> MeshGateway {
    store
        .typed("MeshGateway", Some(NAMESPACE), name)
        .unwrap_or_else(|| panic!("gateway {name} is stored"))
}

/// Give the LoadBalancer Service `name` an ingress IP
pub fn assign_load_balancer_ip(store: &MemoryStore, name: &str, ip: &str) {
    store.tamper(
        "Service",
        Some(NAMESPACE),
        name,
        &json!({"status": {"loadBalancer": {"ingress": [{"ip": ip}]}}}),
    );
}
