//! # MeshGateway
//!
//! One ingress or egress gateway deployment.
//!
//! The spec is self-contained so the gateway controller never has to look up the
//! control plane that produced it.

use crate::constants::{DEFAULT_IMAGE_HUB, DEFAULT_MESH_VERSION};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// MeshGateway Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: mesh.octopilot.io/v1beta1
/// kind: MeshGateway
/// metadata:
///   name: mesh-ingressgateway
///   namespace: mesh-system
/// spec:
///   type: ingress
///   serviceType: LoadBalancer
///   ports:
///     - name: http2
///       port: 80
///       targetPort: 8080
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "MeshGateway",
    group = "mesh.octopilot.io",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::LifecycleStatus",
    shortname = "mgw",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}, {"name":"Service Type", "type":"string", "jsonPath":".spec.serviceType"}, {"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Addresses", "type":"string", "jsonPath":".status.addresses"}, {"name":"Error", "type":"string", "jsonPath":".status.errorMessage", "priority":1}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshGatewaySpec {
    #[serde(rename = "type")]
    pub gateway_type: GatewayType,
    /// Stop managing the gateway; the resource moves to `Unmanaged`
    #[serde(default)]
    pub suspend: bool,
    /// Proxy image
    #[serde(default)]
    pub image: Option<String>,
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
    /// Extra labels on the deployment, pods and service
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub service_annotations: BTreeMap<String, String>,
    /// Default: true
    #[serde(default)]
    pub pod_disruption_budget: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GatewayType {
    #[default]
    Ingress,
    Egress,
}

impl GatewayType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }

    /// Ingress gateways are exposed outside the cluster by default
    #[must_use]
    pub fn default_service_type(self) -> ServiceType {
        match self {
            Self::Ingress => ServiceType::LoadBalancer,
            Self::Egress => ServiceType::ClusterIP,
        }
    }

    #[must_use]
    pub fn default_ports(self) -> Vec<GatewayPort> {
        let mut ports = vec![
            GatewayPort::new("http2", 80, 8080),
            GatewayPort::new("https", 443, 8443),
        ];
        if self == Self::Ingress {
            ports.push(GatewayPort::new("status-port", 15021, 15021));
        }
        ports
    }
}

impl fmt::Display for GatewayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterIP => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPort {
    pub name: String,
    pub port: i32,
    /// Defaults to `port`
    #[serde(default)]
    pub target_port: Option<i32>,
    /// Default: TCP
    #[serde(default)]
    pub protocol: Option<String>,
}

impl GatewayPort {
    #[must_use]
    pub fn new(name: &str, port: i32, target_port: i32) -> Self {
        Self {
            name: name.to_string(),
            port,
            target_port: Some(target_port),
            protocol: Some("TCP".to_string()),
        }
    }
}

impl MeshGatewaySpec {
    /// Fill every unset field with its default
    pub fn set_defaults(&mut self) {
        self.image.get_or_insert_with(|| {
            format!("{DEFAULT_IMAGE_HUB}/proxyv2:{DEFAULT_MESH_VERSION}")
        });
        self.replica_count.get_or_insert(1);
        self.min_replicas.get_or_insert(1);
        self.max_replicas.get_or_insert(5);
        self.service_type
            .get_or_insert(self.gateway_type.default_service_type());
        if self.ports.is_empty() {
            self.ports = self.gateway_type.default_ports();
        }
        self.pod_disruption_budget.get_or_insert(true);
    }

    #[must_use]
    pub fn autoscaled(&self) -> bool {
        has_autoscaling_range(self.min_replicas, self.max_replicas)
    }
}

/// Autoscaling is only worth an HPA when the range is non-trivial
#[must_use]
pub fn has_autoscaling_range(min_replicas: Option<i32>, max_replicas: Option<i32>) -> bool {
    match (min_replicas, max_replicas) {
        (Some(min), Some(max)) => min > 1 && min != max,
        _ => false,
    }
}
