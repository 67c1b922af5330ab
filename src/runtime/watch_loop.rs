//! # Watch Loop
//!
//! Runs the `MeshControlPlane` and `MeshGateway` controllers side by side and
//! restarts them when their streams end, until a shutdown signal arrives.
//!
//! Parents are watched through a generation filter, so a pass writing its own
//! status does not trigger the next one; changes to owned objects still do.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{
    reconcile_control_plane, reconcile_gateway, resource_key, Reconciler, ReconcilerError,
};
use crate::controller::server::ServerState;
use crate::crd::{ManagedParent, MeshControlPlane, MeshGateway};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector::{self, Store};
use kube_runtime::{controller, predicates, watcher, Controller, WatchStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Watch stream tuning, copied out of the controller configuration
#[derive(Debug, Clone, Copy)]
struct WatchSettings {
    backoff_start_ms: u64,
    backoff_max_ms: u64,
    restart_delay: Duration,
}

impl From<&ControllerConfig> for WatchSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            backoff_start_ms: config.watch_backoff_start_ms,
            backoff_max_ms: config.watch_backoff_max_ms,
            restart_delay: config.watch_restart_delay_duration(),
        }
    }
}

/// Kinds each controller watches for changes made behind its back
const CONTROL_PLANE_OWNED_KINDS: &[&str] = &[
    "MeshGateway",
    "Deployment",
    "Service",
    "ConfigMap",
    "ServiceAccount",
    "HorizontalPodAutoscaler",
    "PodDisruptionBudget",
];
const GATEWAY_OWNED_KINDS: &[&str] = &[
    "Deployment",
    "Service",
    "ServiceAccount",
    "HorizontalPodAutoscaler",
    "PodDisruptionBudget",
];

type ControllerEvent<T> = Result<T, controller::Error<ReconcilerError, watcher::Error>>;

/// Keep successful events and reconcile failures; drop stream errors after
/// applying their backoff so the stream restarts
async fn keep_event<T>(
    event: ControllerEvent<T>,
    backoff_ms: Arc<AtomicU64>,
    settings: WatchSettings,
) -> Option<ControllerEvent<T>> {
    match &event {
        Ok(_) => {
            backoff_ms.store(settings.backoff_start_ms, Ordering::Relaxed);
            debug!("watch.event.success");
            Some(event)
        }
        Err(controller::Error::ReconcilerFailed(error, object)) => {
            debug!(object = %object, error = %error, "watch.event.reconciliation_failed");
            Some(event)
        }
        Err(e) => {
            let error_string = format!("{e:?}");
            handle_watch_stream_error(
                &error_string,
                &backoff_ms,
                settings.backoff_max_ms,
                settings.restart_delay,
            )
            .await
            .then_some(event)
        }
    }
}

fn watch_config() -> watcher::Config {
    watcher::Config::default().any_semantic()
}

/// Parents whose generation changed, reflected into a store for the controller.
/// Deleted parents have their backoff state dropped.
fn parent_stream<P: ManagedParent>(
    api: Api<P>,
    reconciler: Arc<Reconciler>,
) -> (Store<P>, impl Stream<Item = Result<P, watcher::Error>> + Send + 'static) {
    let (reader, writer) = reflector::store();
    let stream = watcher(api, watch_config())
        .default_backoff()
        .reflect(writer)
        .inspect(move |event| {
            if let Ok(watcher::Event::Delete(parent)) = event {
                reconciler.forget_backoff(&resource_key(parent));
            }
        })
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

async fn run_control_plane_controller(
    client: Client,
    reconciler: Arc<Reconciler>,
    backoff_ms: Arc<AtomicU64>,
    settings: WatchSettings,
) {
    let concurrency = reconciler.config().max_concurrent_reconciliations;
    let (reader, parents) = parent_stream(
        Api::<MeshControlPlane>::all(client.clone()),
        Arc::clone(&reconciler),
    );
    debug!(owned = ?CONTROL_PLANE_OWNED_KINDS, "starting control plane controller");
    Controller::for_stream(parents, reader)
        .owns(Api::<MeshGateway>::all(client.clone()), watch_config())
        .owns(Api::<Deployment>::all(client.clone()), watch_config())
        .owns(Api::<Service>::all(client.clone()), watch_config())
        .owns(Api::<ConfigMap>::all(client.clone()), watch_config())
        .owns(Api::<ServiceAccount>::all(client.clone()), watch_config())
        .owns(Api::<HorizontalPodAutoscaler>::all(client.clone()), watch_config())
        .owns(Api::<PodDisruptionBudget>::all(client), watch_config())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(
            reconcile_control_plane,
            handle_reconciliation_error::<MeshControlPlane>,
            reconciler,
        )
        .filter_map(move |event| keep_event(event, Arc::clone(&backoff_ms), settings))
        .for_each(|_| futures::future::ready(()))
        .await;
}

async fn run_gateway_controller(
    client: Client,
    reconciler: Arc<Reconciler>,
    backoff_ms: Arc<AtomicU64>,
    settings: WatchSettings,
) {
    let concurrency = reconciler.config().max_concurrent_reconciliations;
    let (reader, parents) = parent_stream(
        Api::<MeshGateway>::all(client.clone()),
        Arc::clone(&reconciler),
    );
    debug!(owned = ?GATEWAY_OWNED_KINDS, "starting gateway controller");
    Controller::for_stream(parents, reader)
        .owns(Api::<Deployment>::all(client.clone()), watch_config())
        .owns(Api::<Service>::all(client.clone()), watch_config())
        .owns(Api::<ServiceAccount>::all(client.clone()), watch_config())
        .owns(Api::<HorizontalPodAutoscaler>::all(client.clone()), watch_config())
        .owns(Api::<PodDisruptionBudget>::all(client), watch_config())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(
            reconcile_gateway,
            handle_reconciliation_error::<MeshGateway>,
            reconciler,
        )
        .filter_map(move |event| keep_event(event, Arc::clone(&backoff_ms), settings))
        .for_each(|_| futures::future::ready(()))
        .await;
}

/// Run both controllers until shutdown
#[allow(
    clippy::missing_errors_doc,
    reason = "Kept fallible for symmetry with initialization"
)]
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let settings = WatchSettings::from(reconciler.config());
    let restart_after_end = reconciler.config().watch_restart_delay_after_end_duration();
    let backoff_ms = Arc::new(AtomicU64::new(settings.backoff_start_ms));

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, initiating graceful shutdown...");
            shutdown_state.set_ready(false);
            info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
        }
    });

    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        info!(operation = "watch_loop", "Starting controllers...");
        futures::future::join(
            run_control_plane_controller(
                client.clone(),
                Arc::clone(&reconciler),
                Arc::clone(&backoff_ms),
                settings,
            ),
            run_gateway_controller(
                client.clone(),
                Arc::clone(&reconciler),
                Arc::clone(&backoff_ms),
                settings,
            ),
        )
        .await;

        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }
        warn!(
            "Controller watch streams ended, restarting in {} seconds...",
            restart_after_end.as_secs()
        );
        tokio::time::sleep(restart_after_end).await;
    }

    info!("Controllers stopped gracefully");
    Ok(())
}
