//! # Control Plane
//!
//! The discovery deployment and its satellites.
//!
//! The pod template carries an md5 of the mesh configuration and the pilot
//! settings, so any configuration change rolls the pods. While autoscaling is
//! on the deployment leaves `replicas` to the autoscaler.

use super::base::{mesh_config, MESH_CONFIG_MAP};
use super::templates::{self, labels, metadata, parent_namespace, selector};
use crate::constants::CONFIG_HASH_ANNOTATION;
use crate::controller::reconciler::Component;
use crate::crd::{has_autoscaling_range, GatewayPort, MeshControlPlane, MeshControlPlaneSpec};
use crate::engine::{resolve, Flag, OwnerRelation, PlannedObject, RenderError};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, EnvFromSource,
    HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Service, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const PILOT_NAME: &str = "mesh-pilot";
pub const PILOT_SERVICE_ACCOUNT: &str = "mesh-pilot-service-account";

const CONFIG_VOLUME: &str = "config-volume";

#[derive(Debug, Default, Clone, Copy)]
pub struct ControlPlane;

impl Component<MeshControlPlane> for ControlPlane {
    fn name(&self) -> &'static str {
        "control-plane"
    }

    fn plan(&self, parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let spec = &parent.spec;
        let namespace = parent_namespace(parent);
        let owner = OwnerRelation::of(parent)?;

        let enabled = Flag::default_on(spec.control_plane.enabled);
        let pdb = Flag::default_on(spec.default_pod_disruption_budget.enabled);
        let autoscaled = has_autoscaling_range(
            spec.control_plane.min_replicas,
            spec.control_plane.max_replicas,
        );
        let autoscaling = Flag::new(Some(autoscaled), false);

        let settings = pilot_settings(spec);
        let config_hash = config_hash(&mesh_config(spec, &namespace)?, &settings);

        Ok(vec![
            PlannedObject::typed(
                &templates::service_account(PILOT_SERVICE_ACCOUNT, &namespace, labels(PILOT_NAME)),
                Some(owner.clone()),
                resolve([enabled]),
            )?,
            PlannedObject::typed(
                &pilot_config_map(&namespace, settings),
                Some(owner.clone()),
                resolve([enabled]),
            )?,
            PlannedObject::typed(
                &deployment(spec, &namespace, &config_hash, autoscaled),
                Some(owner.clone()),
                resolve([enabled]),
            )?,
            PlannedObject::typed(&service(&namespace), Some(owner.clone()), resolve([enabled]))?,
            PlannedObject::typed(
                &templates::horizontal_pod_autoscaler(
                    PILOT_NAME,
                    &namespace,
                    labels(PILOT_NAME),
                    spec.control_plane.min_replicas,
                    spec.control_plane.max_replicas.unwrap_or(1),
                ),
                Some(owner.clone()),
                resolve([enabled, autoscaling]),
            )?,
            PlannedObject::typed(
                &templates::pod_disruption_budget(
                    PILOT_NAME,
                    &namespace,
                    labels(PILOT_NAME),
                    selector(PILOT_NAME),
                ),
                Some(owner),
                resolve([enabled, pdb]),
            )?,
        ])
    }
}

/// Environment of the discovery container
fn pilot_settings(spec: &MeshControlPlaneSpec) -> BTreeMap<String, String> {
    let mixerless = Flag::default_off(spec.telemetry.mixerless).is_on();
    BTreeMap::from([
        ("PILOT_PUSH_THROTTLE".to_string(), "100".to_string()),
        (
            "PILOT_ENABLE_PROTOCOL_SNIFFING_FOR_OUTBOUND".to_string(),
            "true".to_string(),
        ),
        (
            "PILOT_ENABLE_PROTOCOL_SNIFFING_FOR_INBOUND".to_string(),
            "true".to_string(),
        ),
        (
            "PILOT_ENABLE_MIXERLESS_TELEMETRY".to_string(),
            mixerless.to_string(),
        ),
    ])
}

/// md5 over the mesh configuration and the pilot settings, in key order
fn config_hash(mesh: &str, settings: &BTreeMap<String, String>) -> String {
    let mut input = String::from(mesh);
    for (key, value) in settings {
        input.push_str(key);
        input.push('=');
        input.push_str(value);
        input.push('\n');
    }
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn pilot_config_map(namespace: &str, settings: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(PILOT_NAME, Some(namespace), labels(PILOT_NAME)),
        data: Some(settings),
        ..Default::default()
    }
}

fn pilot_ports() -> Vec<GatewayPort> {
    vec![
        GatewayPort::new("grpc-xds", 15010, 15010),
        GatewayPort::new("https-dns", 15012, 15012),
        GatewayPort::new("https-webhook", 443, 15017),
        GatewayPort::new("http-monitoring", 15014, 15014),
    ]
}

fn container_args(spec: &MeshControlPlaneSpec) -> Vec<String> {
    vec![
        "discovery".to_string(),
        "--monitoringAddr=:15014".to_string(),
        "--log_output_level=default:info".to_string(),
        "--domain".to_string(),
        "cluster.local".to_string(),
        "--keepaliveMaxServerConnectionAge".to_string(),
        "30m".to_string(),
        "--trust-domain".to_string(),
        spec.mesh.trust_domain.clone().unwrap_or_default(),
    ]
}

fn deployment(
    spec: &MeshControlPlaneSpec,
    namespace: &str,
    config_hash: &str,
    autoscaled: bool,
) -> Deployment {
    let mut ports = pilot_ports();
    ports.push(GatewayPort::new("http-debug", 8080, 8080));

    let container = Container {
        name: "discovery".to_string(),
        image: spec.control_plane.image.clone(),
        args: Some(container_args(spec)),
        ports: Some(templates::container_ports(&ports)),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: PILOT_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::Int(8080),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: "/etc/istio/config".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(PILOT_NAME, Some(namespace), labels(PILOT_NAME)),
        spec: Some(DeploymentSpec {
            replicas: if autoscaled {
                None
            } else {
                spec.control_plane.replica_count
            },
            selector: LabelSelector {
                match_labels: Some(selector(PILOT_NAME)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(PILOT_NAME)),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH_ANNOTATION.to_string(),
                        config_hash.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(PILOT_SERVICE_ACCOUNT.to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: MESH_CONFIG_MAP.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(namespace: &str) -> Service {
    Service {
        metadata: metadata(PILOT_NAME, Some(namespace), labels(PILOT_NAME)),
        spec: Some(ServiceSpec {
            selector: Some(selector(PILOT_NAME)),
            ports: Some(templates::service_ports(&pilot_ports())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DesiredState;

    fn control_plane(configure: impl FnOnce(&mut MeshControlPlaneSpec)) -> MeshControlPlane {
        let mut spec = MeshControlPlaneSpec::default();
        configure(&mut spec);
        spec.set_defaults();
        let mut parent = MeshControlPlane::new("mesh", spec);
        parent.metadata.namespace = Some("mesh-system".to_string());
        parent.metadata.uid = Some("cp-uid".to_string());
        parent
    }

    fn desired_by_kind(parent: &MeshControlPlane) -> Vec<(String, DesiredState)> {
        ControlPlane
            .plan(parent)
            .unwrap()
            .into_iter()
            .map(|p| (p.object.identity.kind, p.desired))
            .collect()
    }

    #[test]
    fn test_defaults_render_everything_but_the_autoscaler() {
        let desired = desired_by_kind(&control_plane(|_| {}));
        let present: Vec<_> = desired
            .iter()
            .filter(|(_, state)| state.is_present())
            .map(|(kind, _)| kind.as_str())
            .collect();
        assert_eq!(
            present,
            [
                "ServiceAccount",
                "ConfigMap",
                "Deployment",
                "Service",
                "PodDisruptionBudget"
            ]
        );
    }

    #[test]
    fn test_disabled_control_plane_removes_every_object() {
        let desired = desired_by_kind(&control_plane(|spec| {
            spec.control_plane.enabled = Some(false);
        }));
        assert_eq!(desired.len(), 6);
        assert!(desired.iter().all(|(_, state)| *state == DesiredState::Absent));
    }

    #[test]
    fn test_pod_disruption_budget_follows_its_switch() {
        let desired = desired_by_kind(&control_plane(|spec| {
            spec.default_pod_disruption_budget.enabled = Some(false);
        }));
        let pdb = desired
            .iter()
            .find(|(kind, _)| kind == "PodDisruptionBudget")
            .unwrap();
        assert_eq!(pdb.1, DesiredState::Absent);
    }

    #[test]
    fn test_autoscaling_leaves_replicas_to_the_autoscaler() {
        let parent = control_plane(|spec| {
            spec.control_plane.min_replicas = Some(2);
            spec.control_plane.max_replicas = Some(4);
        });
        let planned = ControlPlane.plan(&parent).unwrap();
        let hpa = planned
            .iter()
            .find(|p| p.object.identity.kind == "HorizontalPodAutoscaler")
            .unwrap();
        assert!(hpa.desired.is_present());
        assert_eq!(hpa.object.payload["spec"]["maxReplicas"], 4);

        let deployment = planned
            .iter()
            .find(|p| p.object.identity.kind == "Deployment")
            .unwrap();
        assert!(deployment.object.payload["spec"].get("replicas").is_none());
    }

    #[test]
    fn test_config_change_changes_pod_template_hash() {
        let hash_of = |parent: &MeshControlPlane| {
            let planned = ControlPlane.plan(parent).unwrap();
            let deployment = planned
                .iter()
                .find(|p| p.object.identity.kind == "Deployment")
                .unwrap();
            deployment.object.payload["spec"]["template"]["metadata"]["annotations"]
                [CONFIG_HASH_ANNOTATION]
                .as_str()
                .unwrap()
                .to_string()
        };

        let base = hash_of(&control_plane(|_| {}));
        assert_eq!(base.len(), 32);
        assert_eq!(base, hash_of(&control_plane(|_| {})));

        let changed = hash_of(&control_plane(|spec| {
            spec.mesh.outbound_traffic_policy = Some("REGISTRY_ONLY".to_string());
        }));
        assert_ne!(base, changed);

        let mixerless = hash_of(&control_plane(|spec| {
            spec.telemetry.mixerless = Some(true);
        }));
        assert_ne!(base, mixerless);
    }
}
