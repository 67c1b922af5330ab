//! # Reconciler
//!
//! One reconciliation pass over a parent resource:
//!
//! 1. Suspended parents are only marked `Unmanaged`.
//! 2. A new parent is marked `Created`, and `Reconciling` is recorded when the
//!    spec generation moved. A parent that failed on its current generation
//!    keeps `ReconcileFailed` until a retry gets through, so repeated failures
//!    write nothing and the watch does not re-trigger ahead of the backoff.
//! 3. The orchestrator converges every component in order.
//! 4. Success records `Available` with the gathered addresses. A pending address
//!    requeues without touching the status. A failure records `ReconcileFailed`
//!    with the first error's message and is returned to the controller, whose
//!    error policy applies the Fibonacci backoff.

pub mod component;
pub mod orchestrator;
pub mod status;

pub use component::{
    AddressError, AddressLookup, Component, ComponentError, ComponentFailure, ComponentReconciler,
};
pub use orchestrator::{ComponentRegistry, Orchestrator, PassOutcome};
pub use status::{needs_reconciling, StatusError, StatusStateMachine, StatusUpdate};

use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::crd::{ConfigState, ManagedParent, MeshControlPlane, MeshGateway};
use crate::engine::error::RenderError;
use crate::engine::object::{ObjectIdentity, StoreTarget};
use crate::engine::reconciler::Engine;
use crate::engine::store::StoreError;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("no store for {kind}: {source}")]
    StoreUnavailable {
        kind: String,
        #[source]
        source: StoreError,
    },
}

/// How a pass ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassResult {
    Unmanaged,
    Converged { addresses: Vec<String> },
    Pending {
        component: &'static str,
        reason: String,
    },
}

/// Shared context of both controllers
pub struct Reconciler {
    engine: Engine,
    control_plane: ComponentRegistry<MeshControlPlane>,
    gateways: ComponentRegistry<MeshGateway>,
    config: ControllerConfig,
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("engine", &self.engine)
            .field("control_plane", &self.control_plane)
            .field("gateways", &self.gateways)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        engine: Engine,
        control_plane: ComponentRegistry<MeshControlPlane>,
        gateways: ComponentRegistry<MeshGateway>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            engine,
            control_plane,
            gateways,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one pass over `parent` with `components`
    #[allow(
        clippy::missing_errors_doc,
        reason = "Returns the first component error, or a status write failure"
    )]
    pub async fn run_pass<P: ManagedParent>(
        &self,
        parent: &P,
        components: &ComponentRegistry<P>,
    ) -> Result<PassResult, ReconcilerError> {
        let kind = P::kind(&()).to_string();
        let identity = ObjectIdentity::of(parent)?;
        let store = self
            .engine
            .stores()
            .store_for(&StoreTarget::Kind(kind.clone()), identity.namespace.as_deref())
            .map_err(|source| ReconcilerError::StoreUnavailable {
                kind: kind.clone(),
                source,
            })?;
        let status = StatusStateMachine::new(store.as_ref());
        let mut current = parent.clone();

        if current.is_suspended() {
            info!(object = %identity, "suspended, not managing");
            status
                .set_status(&mut current, StatusUpdate::new(ConfigState::Unmanaged))
                .await?;
            return Ok(PassResult::Unmanaged);
        }

        if current.lifecycle().and_then(|s| s.state).is_none() {
            status
                .set_status(&mut current, StatusUpdate::new(ConfigState::Created))
                .await?;
        }
        if needs_reconciling(&current) {
            status
                .set_status(&mut current, StatusUpdate::new(ConfigState::Reconciling))
                .await?;
        }

        let mut desired = current.clone();
        desired.apply_defaults();

        let outcome = Orchestrator::new(&self.engine, components).run(&desired).await;
        let failed_before = current.lifecycle().and_then(|s| s.state)
            == Some(ConfigState::ReconcileFailed);
        if outcome.is_ok() && failed_before {
            // A retry of a failed generation got through; clear the failure
            status
                .set_status(&mut current, StatusUpdate::new(ConfigState::Reconciling))
                .await?;
        }

        match outcome {
            Ok(PassOutcome::Converged { addresses }) => {
                status
                    .set_status(
                        &mut current,
                        StatusUpdate::new(ConfigState::Available).addresses(addresses.clone()),
                    )
                    .await?;
                Ok(PassResult::Converged { addresses })
            }
            Ok(PassOutcome::Pending { component, reason }) => {
                metrics::increment_pending_requeues(&kind);
                Ok(PassResult::Pending { component, reason })
            }
            Err(error) => {
                let update =
                    StatusUpdate::new(ConfigState::ReconcileFailed).message(error.to_string());
                if let Err(status_error) = status.set_status(&mut current, update).await {
                    warn!(object = %identity, error = %status_error, "failed to record failure on status");
                }
                Err(error.into())
            }
        }
    }

    /// Record one more failure of `key` and return the next delay in seconds
    /// together with the failure count
    pub fn next_error_backoff(&self, key: &str) -> Option<(u64, u32)> {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| {
                    BackoffState::new(self.config.backoff_min_minutes, self.config.backoff_max_minutes)
                });
                state.increment_error();
                Some((state.backoff.next_backoff_seconds(), state.error_count))
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}", e);
                None
            }
        }
    }

    /// Start the error streak of `key` over after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }

    /// Drop the backoff state of a parent that no longer exists
    pub fn forget_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if states.remove(key).is_some() {
                debug!(key, "dropped backoff state of deleted parent");
            }
        }
    }

    #[must_use]
    pub fn tracked_backoffs(&self) -> usize {
        self.backoff_states.lock().map_or(0, |states| states.len())
    }

    fn action_for(&self, result: &PassResult) -> Action {
        match result {
            PassResult::Unmanaged | PassResult::Converged { .. } => Action::await_change(),
            PassResult::Pending { .. } => {
                metrics::increment_requeues_total("pending");
                Action::requeue(self.config.pending_requeue_duration())
            }
        }
    }
}

/// Backoff key of a parent
pub fn resource_key<P: ManagedParent>(parent: &P) -> String {
    format!(
        "{}/{}/{}",
        P::kind(&()),
        parent.meta().namespace.as_deref().unwrap_or("default"),
        parent.meta().name.as_deref().unwrap_or("unknown")
    )
}

async fn reconcile_parent<P: ManagedParent>(
    parent: Arc<P>,
    ctx: &Reconciler,
    components: &ComponentRegistry<P>,
) -> Result<Action, ReconcilerError> {
    let kind = P::kind(&()).to_string();
    let span = tracing::info_span!(
        "reconcile",
        resource.kind = kind.as_str(),
        resource.name = parent.meta().name.as_deref().unwrap_or("unknown"),
        resource.namespace = parent.meta().namespace.as_deref().unwrap_or("default"),
        correlation_id = %uuid::Uuid::new_v4(),
    );

    async move {
        let started = Instant::now();
        metrics::increment_reconciliations(&kind);
        let result = ctx.run_pass(parent.as_ref(), components).await;
        metrics::observe_reconciliation_duration(&kind, started.elapsed().as_secs_f64());

        let result = result?;
        ctx.reset_backoff(&resource_key(parent.as_ref()));
        match &result {
            PassResult::Pending { component, reason } => {
                info!(component, "pass pending: {}", reason);
            }
            PassResult::Converged { addresses } => {
                info!(?addresses, "pass converged");
            }
            PassResult::Unmanaged => {}
        }
        Ok(ctx.action_for(&result))
    }
    .instrument(span)
    .await
}

/// Reconcile entry point of the `MeshControlPlane` controller
#[allow(
    clippy::missing_errors_doc,
    reason = "Errors are handed to the controller's error policy"
)]
pub async fn reconcile_control_plane(
    parent: Arc<MeshControlPlane>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    reconcile_parent(parent, &ctx, &ctx.control_plane).await
}

/// Reconcile entry point of the `MeshGateway` controller
#[allow(
    clippy::missing_errors_doc,
    reason = "Errors are handed to the controller's error policy"
)]
pub async fn reconcile_gateway(
    parent: Arc<MeshGateway>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    reconcile_parent(parent, &ctx, &ctx.gateways).await
}
