//! # Orchestrator Tests
//!
//! Component ordering, first-failure semantics and address gathering:
//!
//! - components run strictly in registration order
//! - the first failing object stops the pass and is reported unchanged
//! - addresses are concatenated without duplicates
//! - a pending address ends the pass as pending, not failed

mod common;

use async_trait::async_trait;
use common::{control_plane, engine, Failure, MemoryStore, Op, NAMESPACE};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use mesh_operator::components;
use mesh_operator::controller::reconciler::{
    AddressError, AddressLookup, Component, ComponentFailure, ComponentRegistry, Orchestrator,
    PassOutcome,
};
use mesh_operator::crd::MeshControlPlane;
use mesh_operator::engine::{DesiredState, Engine, PlannedObject, RenderError};

/// Renders one ConfigMap and reports fixed addresses
struct Fixed {
    name: &'static str,
    lookup: AddressLookup,
}

#[async_trait]
impl Component<MeshControlPlane> for Fixed {
    fn name(&self) -> &'static str {
        self.name
    }

    fn plan(&self, _parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(vec![PlannedObject::typed(&cm, None, DesiredState::Present)?])
    }

    async fn addresses(
        &self,
        _parent: &MeshControlPlane,
        _engine: &Engine,
    ) -> Result<AddressLookup, AddressError> {
        Ok(self.lookup.clone())
    }
}

fn fixed(name: &'static str, lookup: AddressLookup) -> Fixed {
    Fixed { name, lookup }
}

fn ready(addresses: &[&str]) -> AddressLookup {
    AddressLookup::Ready(addresses.iter().map(|a| (*a).to_string()).collect())
}

fn seeded_parent(store: &MemoryStore) -> MeshControlPlane {
    let mut parent = store.seed(&control_plane(|_| {}));
    parent.spec.set_defaults();
    parent
}

#[tokio::test]
async fn test_components_run_in_registration_order() {
    let store = MemoryStore::new();
    let registry = ComponentRegistry::new()
        .with(fixed("first", AddressLookup::NotApplicable))
        .with(fixed("second", AddressLookup::NotApplicable))
        .with(fixed("third", AddressLookup::NotApplicable));
    let engine = engine(&store);

    let outcome = Orchestrator::new(&engine, &registry)
        .run(&seeded_parent(&store))
        .await
        .unwrap();

    assert_eq!(outcome, PassOutcome::Converged { addresses: Vec::new() });
    assert_eq!(
        store.writes(),
        [
            "create configmap/first",
            "create configmap/second",
            "create configmap/third"
        ]
    );
}

#[tokio::test]
async fn test_addresses_are_concatenated_without_duplicates() {
    let store = MemoryStore::new();
    let registry = ComponentRegistry::new()
        .with(fixed("a", ready(&["10.0.0.1", "10.0.0.2"])))
        .with(fixed("b", AddressLookup::NotApplicable))
        .with(fixed("c", ready(&["10.0.0.2", "10.0.0.3"])));
    let engine = engine(&store);

    let outcome = Orchestrator::new(&engine, &registry)
        .run(&seeded_parent(&store))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PassOutcome::Converged {
            addresses: vec![
                "10.0.0.1".to_string(),
                "10.0.0.2".to_string(),
                "10.0.0.3".to_string()
            ]
        }
    );
}

#[tokio::test]
async fn test_pending_address_ends_pass_after_all_objects_converged() {
    let store = MemoryStore::new();
    let registry = ComponentRegistry::new()
        .with(fixed("gateway", AddressLookup::Pending("no ingress yet".to_string())))
        .with(fixed("later", ready(&["10.0.0.9"])));
    let engine = engine(&store);

    let outcome = Orchestrator::new(&engine, &registry)
        .run(&seeded_parent(&store))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PassOutcome::Pending {
            component: "gateway",
            reason: "no ingress yet".to_string()
        }
    );
    assert_eq!(store.count("ConfigMap"), 2, "objects converge before addresses are read");
}

#[tokio::test]
async fn test_first_failure_stops_the_pass() {
    let store = MemoryStore::new();
    let parent = seeded_parent(&store);
    let registry = components::control_plane_components();
    let engine = engine(&store);
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);

    let err = Orchestrator::new(&engine, &registry)
        .run(&parent)
        .await
        .unwrap_err();

    assert_eq!(err.component, "control-plane");
    assert!(matches!(err.failure, ComponentFailure::Converge(_)));
    assert!(
        err.to_string().contains("Deployment mesh-system/mesh-pilot"),
        "error should name the failing object: {err}"
    );
    assert_eq!(store.count("Service"), 0, "objects after the failure are skipped");
    assert_eq!(store.count("MeshGateway"), 0, "later components are skipped");
    assert_eq!(store.count("ClusterRole"), 1, "earlier components stay applied");
}

#[tokio::test]
async fn test_default_control_plane_waits_for_ingress_gateway() {
    let store = MemoryStore::new();
    let parent = seeded_parent(&store);
    let registry = components::control_plane_components();
    let engine = engine(&store);

    let outcome = Orchestrator::new(&engine, &registry).run(&parent).await.unwrap();

    assert!(
        matches!(outcome, PassOutcome::Pending { component: "ingress-gateway", .. }),
        "got {outcome:?}"
    );
    assert_eq!(
        store.writes(),
        [
            "create serviceaccount/mesh-reader-service-account",
            "create clusterrole/mesh-reader-mesh-system",
            "create clusterrolebinding/mesh-reader-mesh-system",
            "create configmap/mesh",
            "create serviceaccount/mesh-pilot-service-account",
            "create configmap/mesh-pilot",
            "create deployment/mesh-pilot",
            "create service/mesh-pilot",
            "create poddisruptionbudget/mesh-pilot",
            "create meshgateway/mesh-ingressgateway",
        ]
    );
}

#[tokio::test]
async fn test_render_failure_is_reported_before_any_write() {
    let store = MemoryStore::new();
    // never stored, so it has no uid to own objects with
    let mut parent = control_plane(|_| {});
    parent.spec.set_defaults();
    let registry = components::control_plane_components();
    let engine = engine(&store);

    let err = Orchestrator::new(&engine, &registry)
        .run(&parent)
        .await
        .unwrap_err();

    assert_eq!(err.component, "base");
    assert!(matches!(
        err.failure,
        ComponentFailure::Render(RenderError::MissingUid { .. })
    ));
    assert!(store.writes().is_empty());
}
