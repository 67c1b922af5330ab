//! # Components
//!
//! What the operator installs, grouped into components reconciled in order.
//!
//! ## Module Structure
//!
//! - `base.rs` - reader RBAC and the mesh configuration
//! - `control_plane.rs` - the discovery deployment
//! - `telemetry.rs` - in-proxy telemetry filters
//! - `mesh_gateways.rs` - ingress and egress `MeshGateway`s of a control plane
//! - `gateway.rs` - the deployment behind one `MeshGateway`
//! - `address.rs` - gateway addresses from Services
//! - `templates.rs` - shared object builders

pub mod address;
pub mod base;
pub mod control_plane;
pub mod gateway;
pub mod mesh_gateways;
pub mod telemetry;
pub mod templates;

pub use base::Base;
pub use control_plane::ControlPlane;
pub use gateway::GatewayDeployment;
pub use mesh_gateways::{EgressGateway, IngressGateway};
pub use telemetry::Telemetry;

use crate::controller::reconciler::ComponentRegistry;
use crate::crd::{MeshControlPlane, MeshGateway};
use crate::engine::TypeRegistry;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};

/// Every kind the components render, plus the parents that own them
#[must_use]
pub fn type_registry() -> TypeRegistry {
    TypeRegistry::new()
        .with_namespaced::<MeshControlPlane>()
        .with_namespaced::<MeshGateway>()
        .with_namespaced::<ServiceAccount>()
        .with_namespaced::<ConfigMap>()
        .with_namespaced::<Deployment>()
        .with_namespaced::<Service>()
        .with_namespaced::<HorizontalPodAutoscaler>()
        .with_namespaced::<PodDisruptionBudget>()
        .with_cluster::<ClusterRole>()
        .with_cluster::<ClusterRoleBinding>()
        .with_dynamic(&telemetry::envoy_filter_resource())
        .with_dynamic(&mesh_gateways::gateway_resource())
}

/// Components of a `MeshControlPlane`, in reconciliation order
#[must_use]
pub fn control_plane_components() -> ComponentRegistry<MeshControlPlane> {
    ComponentRegistry::new()
        .with(Base)
        .with(ControlPlane)
        .with(Telemetry)
        .with(IngressGateway)
        .with(EgressGateway)
}

/// Components of a `MeshGateway`
#[must_use]
pub fn gateway_components() -> ComponentRegistry<MeshGateway> {
    ComponentRegistry::new().with(GatewayDeployment)
}
