//! # Object Reconcilers
//!
//! Thin front-ends over [`converge`]: they pick the store for an object, turn
//! its owner relation into an owner reference through the type registry, and
//! hand both to the shared state machine.

use crate::engine::converge::converge;
use crate::engine::desired::DesiredState;
use crate::engine::error::ConvergeError;
use crate::engine::object::{
    DynamicResource, ManagedObject, PlannedObject, ReconcileOutcome, StoreTarget,
};
use crate::engine::registry::TypeRegistry;
use crate::engine::store::{ObjectStore, StoreProvider};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::sync::Arc;

/// Store access plus type registry; cheap to clone
#[derive(Clone)]
pub struct Engine {
    registry: Arc<TypeRegistry>,
    stores: Arc<dyn StoreProvider>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("kinds", &self.registry.kinds().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(registry: Arc<TypeRegistry>, stores: Arc<dyn StoreProvider>) -> Self {
        Self { registry, stores }
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn stores(&self) -> &dyn StoreProvider {
        self.stores.as_ref()
    }

    #[must_use]
    pub fn objects(&self) -> ObjectReconciler<'_> {
        ObjectReconciler { engine: self }
    }

    #[must_use]
    pub fn dynamic(&self) -> DynamicReconciler<'_> {
        DynamicReconciler { engine: self }
    }

    /// Converge a planned object through the reconciler matching its target
    pub async fn apply(&self, planned: &PlannedObject) -> Result<ReconcileOutcome, ConvergeError> {
        match &planned.target {
            StoreTarget::Kind(_) => {
                self.objects()
                    .reconcile(&planned.object, planned.desired)
                    .await
            }
            StoreTarget::Dynamic(resource) => {
                self.dynamic()
                    .reconcile(resource, &planned.object, planned.desired)
                    .await
            }
        }
    }

    fn store(
        &self,
        target: &StoreTarget,
        object: &ManagedObject,
    ) -> Result<Arc<dyn ObjectStore>, ConvergeError> {
        self.stores
            .store_for(target, object.identity.namespace.as_deref())
            .map_err(|source| ConvergeError::StoreUnavailable {
                identity: object.identity.clone(),
                source,
            })
    }

    fn owner_reference(
        &self,
        object: &ManagedObject,
    ) -> Result<Option<OwnerReference>, ConvergeError> {
        object
            .owner
            .as_ref()
            .map(|owner| {
                self.registry
                    .owner_reference(owner)
                    .ok_or_else(|| ConvergeError::OwnerUnresolved {
                        identity: object.identity.clone(),
                        owner_kind: owner.kind.clone(),
                    })
            })
            .transpose()
    }

    async fn converge_on(
        &self,
        target: &StoreTarget,
        object: &ManagedObject,
        desired: DesiredState,
    ) -> Result<ReconcileOutcome, ConvergeError> {
        let store = self.store(target, object)?;
        let owner = self.owner_reference(object)?;
        converge(store.as_ref(), object, owner.as_ref(), desired).await
    }
}

/// Converges objects of compiled types registered in the type registry
#[derive(Debug, Clone, Copy)]
pub struct ObjectReconciler<'a> {
    engine: &'a Engine,
}

impl ObjectReconciler<'_> {
    pub async fn reconcile(
        &self,
        object: &ManagedObject,
        desired: DesiredState,
    ) -> Result<ReconcileOutcome, ConvergeError> {
        let target = StoreTarget::Kind(object.identity.kind.clone());
        self.engine.converge_on(&target, object, desired).await
    }
}

/// Converges schema-less objects addressed by group/version/resource
#[derive(Debug, Clone, Copy)]
pub struct DynamicReconciler<'a> {
    engine: &'a Engine,
}

impl DynamicReconciler<'_> {
    pub async fn reconcile(
        &self,
        resource: &DynamicResource,
        object: &ManagedObject,
        desired: DesiredState,
    ) -> Result<ReconcileOutcome, ConvergeError> {
        let target = StoreTarget::Dynamic(resource.clone());
        self.engine.converge_on(&target, object, desired).await
    }
}
