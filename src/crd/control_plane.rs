//! # MeshControlPlane
//!
//! Top-level specification of a mesh installation.

use crate::constants::{DEFAULT_IMAGE_HUB, DEFAULT_MESH_VERSION};
use crate::crd::gateway::{GatewayPort, GatewayType, ServiceType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MeshControlPlane Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: mesh.octopilot.io/v1beta1
/// kind: MeshControlPlane
/// metadata:
///   name: mesh
///   namespace: mesh-system
/// spec:
///   version: "1.22.3"
///   telemetry:
///     mixerless: true
///   gateways:
///     enabled: true
///     ingress:
///       enabled: true
///       k8sIngress: false
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MeshControlPlane",
    group = "mesh.octopilot.io",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::LifecycleStatus",
    shortname = "mcp",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Addresses", "type":"string", "jsonPath":".status.addresses"}, {"name":"Error", "type":"string", "jsonPath":".status.errorMessage", "priority":1}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshControlPlaneSpec {
    /// Stop managing the installation; the resource moves to `Unmanaged`
    #[serde(default)]
    pub suspend: bool,
    /// Mesh release, used as image tag
    #[serde(default)]
    pub version: Option<String>,
    /// Image registry for mesh components
    #[serde(default)]
    pub hub: Option<String>,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub default_pod_disruption_budget: ToggleConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    /// Mesh-wide proxy configuration, rendered into the mesh config map
    #[serde(default)]
    pub mesh: MeshConfig,
}

/// Control plane (discovery) deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    /// Default: true
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub replica_count: Option<i32>,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToggleConfig {
    /// Default: true
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// In-proxy telemetry through envoy filters. Default: false
    #[serde(default)]
    pub mixerless: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub image: Option<String>,
    /// Install the metadata exchange filter even without mixerless telemetry. Default: false
    #[serde(default)]
    pub use_metadata_exchange_filter: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaysConfig {
    /// Default: true
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ingress: IngressGatewayConfig,
    #[serde(default)]
    pub egress: EgressGatewayConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressGatewayConfig {
    /// Default: true
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Serve Kubernetes Ingress resources through this gateway. Default: false
    #[serde(default)]
    pub k8s_ingress: Option<bool>,
    #[serde(default)]
    pub deployment: GatewayDeploymentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressGatewayConfig {
    /// Default: false
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub deployment: GatewayDeploymentConfig,
}

/// Settings passed on to the `MeshGateway` a gateway component renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDeploymentConfig {
    #[serde(default)]
    pub replica_count: Option<i32>,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
    #[serde(default)]
    pub load_balancer_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<GatewayPort>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub service_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    /// Default: "10s"
    #[serde(default)]
    pub connect_timeout: Option<String>,
    /// Default: "cluster.local"
    #[serde(default)]
    pub trust_domain: Option<String>,
    /// Empty disables access logs
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Default: true
    #[serde(default)]
    pub enable_auto_mtls: Option<bool>,
    /// `ALLOW_ANY` or `REGISTRY_ONLY`. Default: `ALLOW_ANY`
    #[serde(default)]
    pub outbound_traffic_policy: Option<String>,
}

impl MeshControlPlaneSpec {
    /// Fill every unset field with its default.
    ///
    /// Switches stay `None`; their defaults are applied where they are read.
    pub fn set_defaults(&mut self) {
        let version = self
            .version
            .get_or_insert_with(|| DEFAULT_MESH_VERSION.to_string())
            .clone();
        let hub = self
            .hub
            .get_or_insert_with(|| DEFAULT_IMAGE_HUB.to_string())
            .clone();

        let cp = &mut self.control_plane;
        cp.image
            .get_or_insert_with(|| format!("{hub}/pilot:{version}"));
        cp.replica_count.get_or_insert(1);
        cp.min_replicas.get_or_insert(1);
        cp.max_replicas.get_or_insert(5);

        self.proxy
            .image
            .get_or_insert_with(|| format!("{hub}/proxyv2:{version}"));

        self.gateways
            .ingress
            .deployment
            .set_defaults(GatewayType::Ingress);
        self.gateways
            .egress
            .deployment
            .set_defaults(GatewayType::Egress);

        let mesh = &mut self.mesh;
        mesh.connect_timeout
            .get_or_insert_with(|| "10s".to_string());
        mesh.trust_domain
            .get_or_insert_with(|| "cluster.local".to_string());
        mesh.access_log_file.get_or_insert_with(String::new);
        mesh.enable_auto_mtls.get_or_insert(true);
        mesh.outbound_traffic_policy
            .get_or_insert_with(|| "ALLOW_ANY".to_string());
    }
}

impl GatewayDeploymentConfig {
    fn set_defaults(&mut self, gateway_type: GatewayType) {
        self.replica_count.get_or_insert(1);
        self.min_replicas.get_or_insert(1);
        self.max_replicas.get_or_insert(5);
        self.service_type
            .get_or_insert(gateway_type.default_service_type());
        if self.ports.is_empty() {
            self.ports = gateway_type.default_ports();
        }
    }
}
