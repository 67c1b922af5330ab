//! # Initialization
//!
//! Start-up: rustls provider, logging, metrics, HTTP server, Kubernetes client
//! and the reconciler context.

use crate::components;
use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{MeshControlPlane, MeshGateway};
use crate::engine::kube_store::KubeStores;
use crate::engine::reconciler::Engine;
use crate::observability::{logging, metrics};
use anyhow::{anyhow, Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails when logging, metrics, the HTTP server or the Kubernetes client cannot start"
)]
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection is made
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = ControllerConfig::from_env();
    let server_config = ServerConfig::from_env();
    logging::init(&config)?;
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting mesh operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    if config.enable_metrics {
        metrics::register_metrics()?;
    }

    let server_state = Arc::new(ServerState::default());
    let server_task_state = Arc::clone(&server_state);
    let port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_task_state).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let registry = Arc::new(components::type_registry());
    let stores = Arc::new(KubeStores::new(
        client.clone(),
        Arc::clone(&registry),
        &config.field_manager,
    ));
    let engine = Engine::new(registry, stores);
    let reconciler = Arc::new(Reconciler::new(
        engine,
        components::control_plane_components(),
        components::gateway_components(),
        config,
    ));

    summarize_existing::<MeshControlPlane>(&client).await;
    summarize_existing::<MeshGateway>(&client).await;

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let started = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if started.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(server_config.poll_interval()).await;
    }
}

/// Log how many parents of kind `P` already exist, per namespace.
///
/// A failing list usually means the CRD is not installed; the controller still
/// starts and its watch keeps retrying.
async fn summarize_existing<P>(client: &Client)
where
    P: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    let kind = P::kind(&());
    let api: Api<P> = Api::all(client.clone());
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &list.items {
                by_namespace
                    .entry(item.meta().namespace.clone().unwrap_or_default())
                    .or_default()
                    .push(item.meta().name.clone().unwrap_or_default());
            }
            info!(
                resource.kind = kind.as_ref(),
                total = list.items.len(),
                namespaces = by_namespace.len(),
                "existing resources"
            );
            for (namespace, names) in &by_namespace {
                info!(resource.kind = kind.as_ref(), namespace = namespace.as_str(), "  {}", names.join(", "));
            }
        }
        Err(e) => {
            error!("{} is not queryable: {}. Is the CRD installed?", kind, e);
            error!("Installation: crdgen | kubectl apply -f -");
        }
    }
}
