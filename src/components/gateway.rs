//! # Gateway
//!
//! The proxy deployment behind one `MeshGateway`, and the addresses its
//! Service exposes.

use super::address;
use super::templates::{self, metadata, parent_namespace, selector};
use crate::constants::API_GROUP;
use crate::controller::reconciler::{AddressError, AddressLookup, Component};
use crate::crd::{GatewayPort, MeshGateway, MeshGatewaySpec};
use crate::engine::{
    resolve, DesiredState, Engine, Flag, ObjectIdentity, OwnerRelation, PlannedObject, RenderError,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Probe, Service, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Proxy readiness and telemetry ports, on top of the gateway's own ports
const STATUS_PORT: i32 = 15020;
const ENVOY_PROMETHEUS_PORT: i32 = 15090;

fn gateway_type_label() -> String {
    format!("{API_GROUP}/gateway-type")
}

fn service_account_name(name: &str) -> String {
    format!("{name}-service-account")
}

/// Object labels: `app`, managed-by and the gateway type
fn object_labels(name: &str, spec: &MeshGatewaySpec) -> BTreeMap<String, String> {
    let mut labels = templates::labels(name);
    labels.insert(gateway_type_label(), spec.gateway_type.as_str().to_string());
    labels
}

/// Pod labels: object labels plus the user's, which never replace ours
fn pod_labels(name: &str, spec: &MeshGatewaySpec) -> BTreeMap<String, String> {
    let mut labels = spec.labels.clone();
    labels.extend(object_labels(name, spec));
    labels
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayDeployment;

#[async_trait]
impl Component<MeshGateway> for GatewayDeployment {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn plan(&self, parent: &MeshGateway) -> Result<Vec<PlannedObject>, RenderError> {
        let name = parent.name_any();
        let namespace = parent_namespace(parent);
        let owner = OwnerRelation::of(parent)?;
        let spec = &parent.spec;
        let labels = object_labels(&name, spec);

        let autoscaling = Flag::new(Some(spec.autoscaled()), false);
        let pdb = Flag::default_on(spec.pod_disruption_budget);

        Ok(vec![
            PlannedObject::typed(
                &templates::service_account(&service_account_name(&name), &namespace, labels.clone()),
                Some(owner.clone()),
                DesiredState::Present,
            )?,
            PlannedObject::typed(
                &deployment(&name, &namespace, spec),
                Some(owner.clone()),
                DesiredState::Present,
            )?,
            PlannedObject::typed(
                &service(&name, &namespace, spec),
                Some(owner.clone()),
                DesiredState::Present,
            )?,
            PlannedObject::typed(
                &templates::horizontal_pod_autoscaler(
                    &name,
                    &namespace,
                    labels.clone(),
                    spec.min_replicas,
                    spec.max_replicas.unwrap_or(1),
                ),
                Some(owner.clone()),
                resolve([autoscaling]),
            )?,
            PlannedObject::typed(
                &templates::pod_disruption_budget(&name, &namespace, labels, selector(&name)),
                Some(owner),
                resolve([pdb]),
            )?,
        ])
    }

    async fn addresses(&self, parent: &MeshGateway, engine: &Engine) -> Result<AddressLookup, AddressError> {
        let namespace = parent_namespace(parent);
        let identity = ObjectIdentity::new(Service::kind(&()), Some(&namespace), parent.name_any());
        address::lookup_service(engine, &identity).await
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn proxy_container(name: &str, spec: &MeshGatewaySpec) -> Container {
    let mut ports = spec.ports.clone();
    for (port_name, number) in [("status-port", STATUS_PORT), ("http-envoy-prom", ENVOY_PROMETHEUS_PORT)] {
        if !ports.iter().any(|p| p.target_port.unwrap_or(p.port) == number) {
            ports.push(GatewayPort::new(port_name, number, number));
        }
    }

    Container {
        name: "istio-proxy".to_string(),
        image: spec.image.clone(),
        args: Some(vec![
            "proxy".to_string(),
            "router".to_string(),
            "--domain".to_string(),
            "$(POD_NAMESPACE).svc.cluster.local".to_string(),
            "--serviceCluster".to_string(),
            name.to_string(),
            "--proxyLogLevel=warning".to_string(),
        ]),
        env: Some(vec![
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
            field_env("INSTANCE_IP", "status.podIP"),
            field_env("SERVICE_ACCOUNT", "spec.serviceAccountName"),
        ]),
        ports: Some(templates::container_ports(&ports)),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/healthz/ready".to_string()),
                port: IntOrString::Int(STATUS_PORT),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(1),
            period_seconds: Some(2),
            failure_threshold: Some(30),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(name: &str, namespace: &str, spec: &MeshGatewaySpec) -> Deployment {
    Deployment {
        metadata: metadata(name, Some(namespace), object_labels(name, spec)),
        spec: Some(DeploymentSpec {
            replicas: if spec.autoscaled() {
                None
            } else {
                spec.replica_count
            },
            selector: LabelSelector {
                match_labels: Some(selector(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels(name, spec)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account_name(name)),
                    containers: vec![proxy_container(name, spec)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(name: &str, namespace: &str, spec: &MeshGatewaySpec) -> Service {
    let mut meta = metadata(name, Some(namespace), object_labels(name, spec));
    if !spec.service_annotations.is_empty() {
        meta.annotations = Some(spec.service_annotations.clone());
    }
    let service_type = spec
        .service_type
        .unwrap_or_else(|| spec.gateway_type.default_service_type());

    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            type_: Some(service_type.as_str().to_string()),
            load_balancer_ip: spec.load_balancer_ip.clone(),
            selector: Some(selector(name)),
            ports: Some(templates::service_ports(&spec.ports)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GatewayType, ServiceType};

    fn gateway(configure: impl FnOnce(&mut MeshGatewaySpec)) -> MeshGateway {
        let mut spec = MeshGatewaySpec::default();
        configure(&mut spec);
        spec.set_defaults();
        let mut gateway = MeshGateway::new("edge", spec);
        gateway.metadata.namespace = Some("mesh-system".to_string());
        gateway.metadata.uid = Some("gw-uid".to_string());
        gateway
    }

    fn find<'a>(planned: &'a [PlannedObject], kind: &str) -> &'a PlannedObject {
        planned
            .iter()
            .find(|p| p.object.identity.kind == kind)
            .unwrap()
    }

    #[test]
    fn test_plan_order_and_default_states() {
        let planned = GatewayDeployment.plan(&gateway(|_| {})).unwrap();
        let summary: Vec<_> = planned
            .iter()
            .map(|p| (p.object.identity.kind.as_str(), p.desired))
            .collect();
        assert_eq!(
            summary,
            [
                ("ServiceAccount", DesiredState::Present),
                ("Deployment", DesiredState::Present),
                ("Service", DesiredState::Present),
                ("HorizontalPodAutoscaler", DesiredState::Absent),
                ("PodDisruptionBudget", DesiredState::Present),
            ]
        );
        assert!(planned
            .iter()
            .all(|p| p.object.owner.as_ref().map(|o| o.kind.as_str()) == Some("MeshGateway")));
    }

    #[test]
    fn test_autoscaler_only_for_non_trivial_range() {
        let cases = [
            (Some(1), Some(5), DesiredState::Absent),
            (Some(3), Some(3), DesiredState::Absent),
            (Some(2), Some(5), DesiredState::Present),
        ];
        for (min, max, expected) in cases {
            let parent = gateway(|spec| {
                spec.min_replicas = min;
                spec.max_replicas = max;
            });
            let planned = GatewayDeployment.plan(&parent).unwrap();
            assert_eq!(
                find(&planned, "HorizontalPodAutoscaler").desired,
                expected,
                "min={min:?} max={max:?}"
            );
        }
    }

    #[test]
    fn test_pod_disruption_budget_can_be_disabled() {
        let planned = GatewayDeployment
            .plan(&gateway(|spec| spec.pod_disruption_budget = Some(false)))
            .unwrap();
        assert_eq!(find(&planned, "PodDisruptionBudget").desired, DesiredState::Absent);
    }

    #[test]
    fn test_service_follows_gateway_type() {
        let planned = GatewayDeployment
            .plan(&gateway(|spec| spec.gateway_type = GatewayType::Egress))
            .unwrap();
        let service = &find(&planned, "Service").object.payload;
        assert_eq!(service["spec"]["type"], "ClusterIP");
        assert_eq!(service["spec"]["selector"]["app"], "edge");
        assert_eq!(service["spec"]["ports"].as_array().unwrap().len(), 2);

        let planned = GatewayDeployment
            .plan(&gateway(|spec| {
                spec.service_type = Some(ServiceType::LoadBalancer);
                spec.load_balancer_ip = Some("34.1.2.3".to_string());
                spec.service_annotations =
                    BTreeMap::from([("lb.example.com/internal".to_string(), "true".to_string())]);
            }))
            .unwrap();
        let service = &find(&planned, "Service").object.payload;
        assert_eq!(service["spec"]["type"], "LoadBalancer");
        assert_eq!(service["spec"]["loadBalancerIP"], "34.1.2.3");
        assert_eq!(
            service["metadata"]["annotations"]["lb.example.com/internal"],
            "true"
        );
    }

    #[test]
    fn test_user_labels_never_replace_selector_labels() {
        let planned = GatewayDeployment
            .plan(&gateway(|spec| {
                spec.labels = BTreeMap::from([
                    ("app".to_string(), "other".to_string()),
                    ("team".to_string(), "edge".to_string()),
                ]);
            }))
            .unwrap();
        let labels = &find(&planned, "Deployment").object.payload["spec"]["template"]["metadata"]["labels"];
        assert_eq!(labels["app"], "edge");
        assert_eq!(labels["team"], "edge");
        assert_eq!(labels["mesh.octopilot.io/gateway-type"], "ingress");
    }

    #[test]
    fn test_proxy_container_exposes_status_and_prometheus_ports() {
        let planned = GatewayDeployment
            .plan(&gateway(|spec| {
                spec.ports = vec![
                    GatewayPort::new("http2", 80, 8080),
                    GatewayPort::new("status", 15020, 15020),
                ];
            }))
            .unwrap();
        let container = &find(&planned, "Deployment").object.payload["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["name"], "istio-proxy");
        assert_eq!(container["args"][0], "proxy");
        assert_eq!(container["readinessProbe"]["httpGet"]["path"], "/healthz/ready");
        let ports: Vec<i64> = container["ports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["containerPort"].as_i64().unwrap())
            .collect();
        assert!(ports.contains(&15090));
        assert_eq!(ports.iter().filter(|p| **p == 15020).count(), 1);
        assert_eq!(ports.len(), 3);
    }
}
