//! # Templates
//!
//! Builders shared by the component renderers: labels, metadata and the
//! workload satellites (service account, autoscaler, disruption budget).

use crate::constants::{DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_FIELD_MANAGER};
use crate::crd::GatewayPort;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{ContainerPort, ServiceAccount, ServicePort};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Average CPU utilization the autoscalers target
const TARGET_CPU_UTILIZATION: i32 = 80;

/// `app=<app>` plus the managed-by marker
pub fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), app.to_string()),
        (MANAGED_BY_LABEL.to_string(), DEFAULT_FIELD_MANAGER.to_string()),
    ])
}

/// Pod selector of a workload; a subset of [`labels`] so it never changes when
/// labels are added
pub fn selector(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.to_string())])
}

pub fn metadata(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Namespace the objects of `parent` are rendered into
pub fn parent_namespace<P: Resource>(parent: &P) -> String {
    parent
        .namespace()
        .unwrap_or_else(|| DEFAULT_CONTROLLER_NAMESPACE.to_string())
}

pub fn service_account(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(name, Some(namespace), labels),
        ..Default::default()
    }
}

pub fn horizontal_pod_autoscaler(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    min_replicas: Option<i32>,
    max_replicas: i32,
) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: metadata(name, Some(namespace), labels),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: name.to_string(),
            },
            min_replicas,
            max_replicas,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(TARGET_CPU_UTILIZATION),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod_disruption_budget(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: metadata(name, Some(namespace), labels),
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service_ports(ports: &[GatewayPort]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|port| ServicePort {
            name: Some(port.name.clone()),
            port: port.port,
            target_port: Some(IntOrString::Int(port.target_port.unwrap_or(port.port))),
            protocol: Some(port.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
            ..Default::default()
        })
        .collect()
}

pub fn container_ports(ports: &[GatewayPort]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|port| ContainerPort {
            container_port: port.target_port.unwrap_or(port.port),
            protocol: Some(port.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
            ..Default::default()
        })
        .collect()
}
