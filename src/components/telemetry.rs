//! # Telemetry
//!
//! Proxy filters for in-proxy telemetry, as schema-less `EnvoyFilter`s.
//!
//! The metadata exchange filters are needed both by in-proxy telemetry and by
//! the standalone metadata exchange switch; the stats filters only by in-proxy
//! telemetry.

use super::templates::{labels, parent_namespace};
use crate::controller::reconciler::Component;
use crate::crd::MeshControlPlane;
use crate::engine::{DesiredState, DynamicResource, Flag, OwnerRelation, PlannedObject, RenderError};
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::{json, Value};

const COMPONENT: &str = "mesh-telemetry";
const NULL_VM_RUNTIME: &str = "envoy.wasm.runtime.null";
const PROXY_VERSION: &str = r"^1\..*";

/// `networking.istio.io/v1alpha3` `EnvoyFilter`
pub fn envoy_filter_resource() -> DynamicResource {
    DynamicResource {
        resource: ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("networking.istio.io", "v1alpha3", "EnvoyFilter"),
            "envoyfilters",
        ),
        namespaced: true,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Telemetry;

impl Component<MeshControlPlane> for Telemetry {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn plan(&self, parent: &MeshControlPlane) -> Result<Vec<PlannedObject>, RenderError> {
        let spec = &parent.spec;
        let namespace = parent_namespace(parent);
        let owner = OwnerRelation::of(parent)?;
        let resource = envoy_filter_resource();

        let mixerless = Flag::default_off(spec.telemetry.mixerless).is_on();
        let metadata_exchange = Flag::default_off(spec.proxy.use_metadata_exchange_filter).is_on();
        let exchange = DesiredState::from_bool(mixerless || metadata_exchange);
        let stats = DesiredState::from_bool(mixerless);

        let filters = [
            ("metadata-exchange", http_metadata_exchange(), exchange),
            ("tcp-metadata-exchange", tcp_metadata_exchange(), exchange),
            ("stats", http_stats(), stats),
            ("tcp-stats", tcp_stats(), stats),
        ];
        filters
            .into_iter()
            .map(|(suffix, patches, desired)| {
                PlannedObject::dynamic(
                    &resource,
                    envoy_filter(&format!("{COMPONENT}-{suffix}"), &namespace, patches),
                    Some(owner.clone()),
                    desired,
                )
            })
            .collect()
    }
}

fn envoy_filter(name: &str, namespace: &str, config_patches: Value) -> Value {
    json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels(COMPONENT),
        },
        "spec": {
            "configPatches": config_patches,
        },
    })
}

fn wasm_filter(name: &str, root_id: Option<&str>, configuration: &str) -> Value {
    let mut config = json!({
        "configuration": {
            "@type": "type.googleapis.com/google.protobuf.StringValue",
            "value": configuration,
        },
        "vm_config": {
            "runtime": NULL_VM_RUNTIME,
            "code": {"local": {"inline_string": name}},
        },
    });
    if let Some(root_id) = root_id {
        config["root_id"] = json!(root_id);
        config["vm_config"]["vm_id"] = json!(root_id);
    }
    json!({
        "name": "envoy.filters.http.wasm",
        "typed_config": {
            "@type": "type.googleapis.com/udpa.type.v1.TypedStruct",
            "type_url": "type.googleapis.com/envoy.extensions.filters.http.wasm.v3.Wasm",
            "value": {"config": config},
        },
    })
}

fn http_metadata_exchange() -> Value {
    json!([{
        "applyTo": "HTTP_FILTER",
        "match": {
            "context": "ANY",
            "proxy": {"proxyVersion": PROXY_VERSION},
            "listener": {
                "filterChain": {"filter": {"name": "envoy.filters.network.http_connection_manager"}},
            },
        },
        "patch": {
            "operation": "INSERT_BEFORE",
            "value": wasm_filter("envoy.wasm.metadata_exchange", None, "{}"),
        },
    }])
}

fn upstream_exchange(context: &str) -> Value {
    json!({
        "applyTo": "CLUSTER",
        "match": {
            "context": context,
            "proxy": {"proxyVersion": PROXY_VERSION},
            "cluster": {},
        },
        "patch": {
            "operation": "MERGE",
            "value": {
                "filters": [{
                    "name": "istio.metadata_exchange",
                    "typed_config": {
                        "@type": "type.googleapis.com/udpa.type.v1.TypedStruct",
                        "type_url": "type.googleapis.com/envoy.tcp.metadataexchange.config.MetadataExchange",
                        "value": {"protocol": "istio-peer-exchange"},
                    },
                }],
            },
        },
    })
}

fn tcp_metadata_exchange() -> Value {
    json!([
        {
            "applyTo": "NETWORK_FILTER",
            "match": {
                "context": "SIDECAR_INBOUND",
                "proxy": {"proxyVersion": PROXY_VERSION},
                "listener": {},
            },
            "patch": {
                "operation": "INSERT_BEFORE",
                "value": {
                    "name": "istio.metadata_exchange",
                    "typed_config": {
                        "@type": "type.googleapis.com/udpa.type.v1.TypedStruct",
                        "type_url": "type.googleapis.com/envoy.tcp.metadataexchange.config.MetadataExchange",
                        "value": {"protocol": "istio-peer-exchange"},
                    },
                },
            },
        },
        upstream_exchange("SIDECAR_OUTBOUND"),
        upstream_exchange("GATEWAY"),
    ])
}

fn stats_patch(apply_to: &str, context: &str, filter: &str, root_id: &str) -> Value {
    let listener = if apply_to == "HTTP_FILTER" {
        json!({"filterChain": {"filter": {
            "name": "envoy.filters.network.http_connection_manager",
            "subFilter": {"name": "envoy.filters.http.router"},
        }}})
    } else {
        json!({"filterChain": {"filter": {"name": "envoy.filters.network.tcp_proxy"}}})
    };
    json!({
        "applyTo": apply_to,
        "match": {
            "context": context,
            "proxy": {"proxyVersion": PROXY_VERSION},
            "listener": listener,
        },
        "patch": {
            "operation": "INSERT_BEFORE",
            "value": wasm_filter(filter, Some(root_id), r#"{"debug": "false", "stat_prefix": "istio"}"#),
        },
    })
}

fn http_stats() -> Value {
    json!([
        stats_patch("HTTP_FILTER", "SIDECAR_OUTBOUND", "envoy.wasm.stats", "stats_outbound"),
        stats_patch("HTTP_FILTER", "SIDECAR_INBOUND", "envoy.wasm.stats", "stats_inbound"),
        stats_patch("HTTP_FILTER", "GATEWAY", "envoy.wasm.stats", "stats_outbound"),
    ])
}

fn tcp_stats() -> Value {
    json!([
        stats_patch("NETWORK_FILTER", "SIDECAR_OUTBOUND", "envoy.wasm.stats", "stats_outbound"),
        stats_patch("NETWORK_FILTER", "SIDECAR_INBOUND", "envoy.wasm.stats", "stats_inbound"),
        stats_patch("NETWORK_FILTER", "GATEWAY", "envoy.wasm.stats", "stats_outbound"),
    ])
}
