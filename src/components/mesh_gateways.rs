//! # Mesh Gateways
//!
//! The ingress and egress `MeshGateway` resources a control plane asks for.
//!
//! Each one is reconciled by the gateway controller; the control plane only
//! renders it and, for ingress, waits for it to report its addresses.

use super::address;
use super::templates::{labels, parent_namespace, selector};
use crate::controller::reconciler::{AddressError, AddressLookup, Component};
use crate::crd::{
    ConfigState, GatewayDeploymentConfig, GatewayType, LifecycleStatus, MeshControlPlane,
    MeshControlPlaneSpec, MeshGateway, MeshGatewaySpec,
};
use crate::engine::{
    resolve, DesiredState, DynamicResource, Engine, Flag, ObjectIdentity, OwnerRelation,
    PlannedObject, RenderError,
};
use async_trait::async_trait;
use kube::core::{ApiResource, GroupVersionKind};
use kube::Resource;
use serde_json::json;

pub const INGRESS_GATEWAY_NAME: &str = "mesh-ingressgateway";
pub const EGRESS_GATEWAY_NAME: &str = "mesh-egressgateway";
pub const K8S_INGRESS_GATEWAY_NAME: &str = "mesh-k8s-ingress";

/// `networking.istio.io/v1alpha3` `Gateway`
pub fn gateway_resource() -> DynamicResource {
    DynamicResource {
        resource: ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("networking.istio.io", "v1alpha3", "Gateway"),
            "gateways",
        ),
        namespaced: true,
    }
}

fn mesh_gateway(
    name: &str,
    namespace: &str,
    gateway_type: GatewayType,
    deployment: &GatewayDeploymentConfig,
    spec: &MeshControlPlaneSpec,
) -> MeshGateway {
    let mut gateway = MeshGateway::new(
        name,
        MeshGatewaySpec {
            gateway_type,
            suspend: false,
            image: spec.proxy.image.clone(),
            replica_count: deployment.replica_count,
            min_replicas: deployment.min_replicas,
            max_replicas: deployment.max_replicas,
            service_type: deployment.service_type,
            load_balancer_ip: deployment.load_balancer_ip.clone(),
            ports: deployment.ports.clone(),
            labels: deployment.labels.clone(),
            service_annotations: deployment.service_annotations.clone(),
            pod_disruption_budget: Some(
                Flag::default_on(spec.default_pod_disruption_budget.enabled).is_on(),
            ),
        },
    );
    gateway.metadata.namespace = Some(namespace.to_string());
    gateway.metadata.labels = Some(labels(name));
    gateway
}

fn gateways_flag(spec: &MeshControlPlaneSpec) -> Flag {
    Flag::default_on(spec.gateways.enabled)
}

fn ingress_state(spec: &MeshControlPlaneSpec) -> DesiredState {
    resolve([
        gateways_flag(spec),
        Flag::default_on(spec.gateways.ingress.enabled),
    ])
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngressGateway;

#[async_trait]
impl Component<MeshControlPlane> for IngressGateway {
    fn name(&self) -> &'static str {
        "ingress-gateway"
    }

    fn plan(&self, parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let spec = &parent.spec;
        let namespace = parent_namespace(parent);
        let owner = OwnerRelation::of(parent)?;

        let k8s_ingress = resolve([
            gateways_flag(spec),
            Flag::default_on(spec.gateways.ingress.enabled),
            Flag::default_off(spec.gateways.ingress.k8s_ingress),
        ]);
        let k8s_ingress_gateway = json!({
            "metadata": {
                "name": K8S_INGRESS_GATEWAY_NAME,
                "namespace": namespace,
                "labels": labels(K8S_INGRESS_GATEWAY_NAME),
            },
            "spec": {
                "servers": [{
                    "port": {"name": "http", "protocol": "HTTP2", "number": 80},
                    "hosts": ["*"],
                }],
                "selector": selector(INGRESS_GATEWAY_NAME),
            },
        });

        Ok(vec![
            PlannedObject::typed(
                &mesh_gateway(
                    INGRESS_GATEWAY_NAME,
                    &namespace,
                    GatewayType::Ingress,
                    &spec.gateways.ingress.deployment,
                    spec,
                ),
                Some(owner.clone()),
                ingress_state(spec),
            )?,
            PlannedObject::dynamic(
                &gateway_resource(),
                k8s_ingress_gateway,
                Some(owner),
                k8s_ingress,
            )?,
        ])
    }

    /// Addresses the ingress gateway reported once it became `Available` for
    /// its current generation
    async fn addresses(
        &self,
        parent: &MeshControlPlane,
        engine: &Engine,
    ) -> Result<AddressLookup, AddressError> {
        if !ingress_state(&parent.spec).is_present() {
            return Ok(AddressLookup::NotApplicable);
        }

        let namespace = parent_namespace(parent);
        let identity = ObjectIdentity::new(
            MeshGateway::kind(&()),
            Some(&namespace),
            INGRESS_GATEWAY_NAME,
        );
        let Some(payload) = address::fetch(engine, &identity).await? else {
            return Ok(AddressLookup::Pending(format!("{identity} does not exist yet")));
        };
        let status = address::section::<LifecycleStatus>(&payload, "status", &identity)?
            .unwrap_or_default();
        let generation = payload
            .pointer("/metadata/generation")
            .and_then(serde_json::Value::as_i64);

        match status.state {
            Some(ConfigState::Available) if status.observed_generation == generation => {
                Ok(AddressLookup::Ready(status.addresses))
            }
            Some(ConfigState::Available) => Ok(AddressLookup::Pending(format!(
                "{identity} has not observed its latest generation"
            ))),
            state => Ok(AddressLookup::Pending(format!(
                "{identity} is {}",
                state.map_or("not reconciled yet", ConfigState::as_str)
            ))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EgressGateway;

impl Component<MeshControlPlane> for EgressGateway {
    fn name(&self) -> &'static str {
        "egress-gateway"
    }

    fn plan(&self, parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let spec = &parent.spec;
        let namespace = parent_namespace(parent);
        let desired = resolve([
            gateways_flag(spec),
            Flag::default_off(spec.gateways.egress.enabled),
        ]);

        Ok(vec![PlannedObject::typed(
            &mesh_gateway(
                EGRESS_GATEWAY_NAME,
                &namespace,
                GatewayType::Egress,
                &spec.gateways.egress.deployment,
                spec,
            ),
            Some(OwnerRelation::of(parent)?),
            desired,
        )?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ServiceType;

    fn control_plane(configure: impl FnOnce(&mut MeshControlPlaneSpec)) -> MeshControlPlane {
        let mut spec = MeshControlPlaneSpec::default();
        configure(&mut spec);
        spec.set_defaults();
        let mut parent = MeshControlPlane::new("mesh", spec);
        parent.metadata.namespace = Some("mesh-system".to_string());
        parent.metadata.uid = Some("cp-uid".to_string());
        parent
    }

    fn states(planned: &[PlannedObject]) -> Vec<DesiredState> {
        planned.iter().map(|p| p.desired).collect()
    }

    #[test]
    fn test_ingress_present_by_default_without_k8s_ingress() {
        let planned = IngressGateway.plan(&control_plane(|_| {})).unwrap();
        assert_eq!(
            states(&planned),
            [DesiredState::Present, DesiredState::Absent]
        );
        assert_eq!(planned[0].object.identity.name, INGRESS_GATEWAY_NAME);
        assert_eq!(planned[0].object.payload["spec"]["type"], "ingress");
        assert_eq!(planned[0].object.payload["spec"]["serviceType"], "LoadBalancer");
    }

    #[test]
    fn test_k8s_ingress_requires_all_three_switches() {
        let cases = [
            (None, None, Some(true), DesiredState::Present),
            (Some(false), None, Some(true), DesiredState::Absent),
            (None, Some(false), Some(true), DesiredState::Absent),
            (None, None, Some(false), DesiredState::Absent),
        ];
        for (gateways, ingress, k8s_ingress, expected) in cases {
            let parent = control_plane(|spec| {
                spec.gateways.enabled = gateways;
                spec.gateways.ingress.enabled = ingress;
                spec.gateways.ingress.k8s_ingress = k8s_ingress;
            });
            let planned = IngressGateway.plan(&parent).unwrap();
            assert_eq!(
                planned[1].desired, expected,
                "gateways={gateways:?} ingress={ingress:?} k8sIngress={k8s_ingress:?}"
            );
        }
    }

    #[test]
    fn test_k8s_ingress_gateway_selects_ingress_pods() {
        let planned = IngressGateway.plan(&control_plane(|_| {})).unwrap();
        let gateway = &planned[1].object.payload;
        assert_eq!(gateway["kind"], "Gateway");
        assert_eq!(gateway["spec"]["selector"]["app"], INGRESS_GATEWAY_NAME);
        assert_eq!(gateway["spec"]["servers"][0]["port"]["protocol"], "HTTP2");
        assert_eq!(gateway["spec"]["servers"][0]["hosts"][0], "*");
    }

    #[test]
    fn test_egress_defaults_off() {
        let planned = EgressGateway.plan(&control_plane(|_| {})).unwrap();
        assert_eq!(states(&planned), [DesiredState::Absent]);

        let planned = EgressGateway
            .plan(&control_plane(|spec| spec.gateways.egress.enabled = Some(true)))
            .unwrap();
        assert_eq!(states(&planned), [DesiredState::Present]);
        assert_eq!(planned[0].object.payload["spec"]["serviceType"], "ClusterIP");
    }

    #[test]
    fn test_gateway_spec_carries_proxy_image_and_pdb_switch() {
        let parent = control_plane(|spec| {
            spec.hub = Some("registry.local/mesh".to_string());
            spec.default_pod_disruption_budget.enabled = Some(false);
            spec.gateways.ingress.deployment.service_type = Some(ServiceType::NodePort);
        });
        let gateway = mesh_gateway(
            INGRESS_GATEWAY_NAME,
            "mesh-system",
            GatewayType::Ingress,
            &parent.spec.gateways.ingress.deployment,
            &parent.spec,
        );
        assert!(gateway
            .spec
            .image
            .as_deref()
            .unwrap()
            .starts_with("registry.local/mesh/proxyv2:"));
        assert_eq!(gateway.spec.pod_disruption_budget, Some(false));
        assert_eq!(gateway.spec.service_type, Some(ServiceType::NodePort));
    }
}
