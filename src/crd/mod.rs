//! # Custom Resource Definitions
//!
//! Parent resources reconciled by the operator.
//!
//! ## Module Structure
//!
//! - `control_plane.rs` - `MeshControlPlane`, the mesh installation
//! - `gateway.rs` - `MeshGateway`, one gateway deployment
//! - `status.rs` - lifecycle status shared by both

mod control_plane;
mod gateway;
mod status;

pub use control_plane::{
    ControlPlaneConfig, EgressGatewayConfig, GatewayDeploymentConfig, GatewaysConfig,
    IngressGatewayConfig, MeshConfig, MeshControlPlane, MeshControlPlaneSpec, ProxyConfig,
    TelemetryConfig, ToggleConfig,
};
pub use gateway::{
    has_autoscaling_range, GatewayPort, GatewayType, MeshGateway, MeshGatewaySpec, ServiceType,
};
pub use status::{ConfigState, LifecycleStatus};

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A top-level resource whose spec drives a reconciliation pass
pub trait ManagedParent:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn lifecycle(&self) -> Option<&LifecycleStatus>;

    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus;

    /// Administrator opt-out; the pass only records `Unmanaged`
    fn is_suspended(&self) -> bool;

    /// Fill unset spec fields before rendering
    fn apply_defaults(&mut self);
}

impl ManagedParent for MeshControlPlane {
    fn lifecycle(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref()
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus {
        self.status.get_or_insert_with(LifecycleStatus::default)
    }

    fn is_suspended(&self) -> bool {
        self.spec.suspend
    }

    fn apply_defaults(&mut self) {
        self.spec.set_defaults();
    }
}

impl ManagedParent for MeshGateway {
    fn lifecycle(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref()
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus {
        self.status.get_or_insert_with(LifecycleStatus::default)
    }

    fn is_suspended(&self) -> bool {
        self.spec.suspend
    }

    fn apply_defaults(&mut self) {
        self.spec.set_defaults();
    }
}
