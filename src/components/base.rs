//! # Base
//!
//! Cluster-wide read access for the mesh and the mesh configuration every
//! other component consumes.
//!
//! The cluster role and its binding are cluster-scoped, so they carry the
//! namespace in their name and no owner reference.

use super::control_plane::PILOT_NAME;
use super::templates::{self, labels, metadata, parent_namespace};
use crate::controller::reconciler::Component;
use crate::crd::{MeshControlPlane, MeshControlPlaneSpec};
use crate::engine::{DesiredState, OwnerRelation, PlannedObject, RenderError};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use serde_json::json;
use std::collections::BTreeMap;

pub const READER_NAME: &str = "mesh-reader";
pub const READER_SERVICE_ACCOUNT: &str = "mesh-reader-service-account";
pub const MESH_CONFIG_MAP: &str = "mesh";

const READ_VERBS: [&str; 3] = ["get", "watch", "list"];

#[derive(Debug, Default, Clone, Copy)]
pub struct Base;

impl Component<MeshControlPlane> for Base {
    fn name(&self) -> &'static str {
        "base"
    }

    fn plan(&self, parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let namespace = parent_namespace(parent);
        let owner = OwnerRelation::of(parent)?;
        let present = DesiredState::Present;

        Ok(vec![
            PlannedObject::typed(
                &templates::service_account(READER_SERVICE_ACCOUNT, &namespace, labels(READER_NAME)),
                Some(owner.clone()),
                present,
            )?,
            PlannedObject::typed(&cluster_role(&namespace), None, present)?,
            PlannedObject::typed(&cluster_role_binding(&namespace), None, present)?,
            PlannedObject::typed(&mesh_config_map(&parent.spec, &namespace)?, Some(owner), present)?,
        ])
    }
}

fn reader_name(namespace: &str) -> String {
    format!("{READER_NAME}-{namespace}")
}

fn rule(api_groups: &[&str], resources: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(api_groups.iter().map(ToString::to_string).collect()),
        resources: Some(resources.iter().map(ToString::to_string).collect()),
        verbs: READ_VERBS.iter().map(ToString::to_string).collect(),
        ..Default::default()
    }
}

fn cluster_role(namespace: &str) -> ClusterRole {
    ClusterRole {
        metadata: metadata(&reader_name(namespace), None, labels(READER_NAME)),
        rules: Some(vec![
            rule(
                &[
                    "config.istio.io",
                    "security.istio.io",
                    "networking.istio.io",
                    "telemetry.istio.io",
                ],
                &["*"],
            ),
            rule(
                &[""],
                &["nodes", "pods", "services", "endpoints", "namespaces"],
            ),
            rule(&["apps"], &["replicasets"]),
            rule(&["discovery.k8s.io"], &["endpointslices"]),
        ]),
        ..Default::default()
    }
}

fn cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    let name = reader_name(namespace);
    ClusterRoleBinding {
        metadata: metadata(&name, None, labels(READER_NAME)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name,
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: READER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Mesh-wide proxy and traffic settings, as YAML.
///
/// `spec` must have been defaulted.
pub fn mesh_config(spec: &MeshControlPlaneSpec, namespace: &str) -> Result<String, RenderError> {
    let mesh = &spec.mesh;
    let document = json!({
        "accessLogFile": mesh.access_log_file.clone().unwrap_or_default(),
        "connectTimeout": mesh.connect_timeout,
        "defaultConfig": {
            "binaryPath": "/usr/local/bin/envoy",
            "configPath": "/etc/istio/proxy",
            "discoveryAddress": format!("{PILOT_NAME}.{namespace}.svc:15012"),
            "drainDuration": "45s",
            "proxyAdminPort": 15000,
            "serviceCluster": "istio-proxy",
        },
        "enableAutoMtls": mesh.enable_auto_mtls.unwrap_or(true),
        "enablePrometheusMerge": true,
        "outboundTrafficPolicy": {
            "mode": mesh.outbound_traffic_policy,
        },
        "rootNamespace": namespace,
        "trustDomain": mesh.trust_domain,
    });
    serde_yaml::to_string(&document).map_err(|e| RenderError::Template {
        document: "mesh config".to_string(),
        message: e.to_string(),
    })
}

fn mesh_config_map(spec: &MeshControlPlaneSpec, namespace: &str) -> Result<ConfigMap, RenderError> {
    let mut data = BTreeMap::new();
    data.insert("mesh".to_string(), mesh_config(spec, namespace)?);
    data.insert("meshNetworks".to_string(), "networks: {}\n".to_string());

    Ok(ConfigMap {
        metadata: metadata(MESH_CONFIG_MAP, Some(namespace), labels(MESH_CONFIG_MAP)),
        data: Some(data),
        ..Default::default()
    })
}
