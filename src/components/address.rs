//! # Addresses
//!
//! Externally observable addresses of a gateway, derived from its Service.

use crate::controller::reconciler::{AddressError, AddressLookup};
use crate::engine::{Engine, ObjectIdentity, StoreTarget};
use k8s_openapi::api::core::v1::{Service, ServiceSpec, ServiceStatus};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Addresses a Service publishes, before any name resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAddresses {
    Ready(Vec<String>),
    /// The load balancer reported a hostname instead of an IP
    Hostname(String),
    Pending(String),
}

/// Read the addresses off a Service.
///
/// ClusterIP services publish their cluster IP, or nothing when headless.
/// LoadBalancer services publish the first ingress entry. Other types publish
/// nothing.
pub fn service_addresses(service: &Service) -> ServiceAddresses {
    let spec = service.spec.as_ref();
    let service_type = spec
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP");

    match service_type {
        "ClusterIP" => match spec.and_then(|s| s.cluster_ip.as_deref()) {
            Some("None") => ServiceAddresses::Ready(Vec::new()),
            Some(ip) if !ip.is_empty() => ServiceAddresses::Ready(vec![ip.to_string()]),
            _ => ServiceAddresses::Pending("cluster IP is not allocated yet".to_string()),
        },
        "LoadBalancer" => {
            let first = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| ingress.first());
            match first {
                Some(ingress) => match (ingress.ip.as_deref(), ingress.hostname.as_deref()) {
                    (Some(ip), _) if !ip.is_empty() => ServiceAddresses::Ready(vec![ip.to_string()]),
                    (_, Some(host)) if !host.is_empty() => {
                        ServiceAddresses::Hostname(host.to_string())
                    }
                    _ => ServiceAddresses::Pending(
                        "load balancer ingress has neither IP nor hostname".to_string(),
                    ),
                },
                None => {
                    ServiceAddresses::Pending("load balancer ingress is not assigned yet".to_string())
                }
            }
        }
        _ => ServiceAddresses::Ready(Vec::new()),
    }
}

/// IPv4 addresses `host` resolves to, sorted and deduplicated
pub async fn resolve_ipv4(host: &str) -> std::io::Result<Vec<String>> {
    let mut addresses: Vec<Ipv4Addr> = tokio::net::lookup_host((host, 0))
        .await?
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    addresses.sort_unstable();
    addresses.dedup();
    Ok(addresses.iter().map(ToString::to_string).collect())
}

/// Current payload of `identity`, or `None` when it does not exist
pub async fn fetch(engine: &Engine, identity: &ObjectIdentity) -> Result<Option<Value>, AddressError> {
    let store = engine
        .stores()
        .store_for(
            &StoreTarget::Kind(identity.kind.clone()),
            identity.namespace.as_deref(),
        )
        .map_err(|source| AddressError::Fetch {
            identity: identity.clone(),
            source,
        })?;
    let stored = store
        .get(identity)
        .await
        .map_err(|source| AddressError::Fetch {
            identity: identity.clone(),
            source,
        })?;
    Ok(stored.map(|s| s.payload))
}

/// Decode the named section of a payload, treating a missing one as empty
pub fn section<T>(payload: &Value, key: &str, identity: &ObjectIdentity) -> Result<Option<T>, AddressError>
where
    T: serde::de::DeserializeOwned,
{
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|source| AddressError::Decode {
                identity: identity.clone(),
                source,
            }),
    }
}

/// Addresses of the Service `identity`, resolving load balancer hostnames
pub async fn lookup_service(engine: &Engine, identity: &ObjectIdentity) -> Result<AddressLookup, AddressError> {
    let Some(payload) = fetch(engine, identity).await? else {
        return Ok(AddressLookup::Pending(format!("{identity} does not exist yet")));
    };
    let service = Service {
        spec: section::<ServiceSpec>(&payload, "spec", identity)?,
        status: section::<ServiceStatus>(&payload, "status", identity)?,
        ..Default::default()
    };

    match service_addresses(&service) {
        ServiceAddresses::Ready(addresses) => Ok(AddressLookup::Ready(addresses)),
        ServiceAddresses::Pending(reason) => Ok(AddressLookup::Pending(format!("{identity}: {reason}"))),
        ServiceAddresses::Hostname(host) => match resolve_ipv4(&host).await {
            Ok(addresses) if !addresses.is_empty() => Ok(AddressLookup::Ready(addresses)),
            Ok(_) => Ok(AddressLookup::Pending(format!(
                "{identity}: {host} has no IPv4 address yet"
            ))),
            Err(e) => {
                debug!(object = %identity, host = %host, error = %e, "hostname lookup failed");
                Ok(AddressLookup::Pending(format!(
                    "{identity}: {host} does not resolve yet"
                )))
            }
        },
    }
}
