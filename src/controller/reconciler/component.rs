//! # Components
//!
//! A component is an ordered list of objects rendered from a parent spec,
//! optionally able to report the addresses it exposes.

use crate::engine::error::{ConvergeError, RenderError};
use crate::engine::object::{ObjectIdentity, PlannedObject, ReconcileOutcome};
use crate::engine::reconciler::Engine;
use crate::engine::store::StoreError;
use crate::observability::metrics;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Result of asking a component for its externally observable addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressLookup {
    /// The component exposes nothing
    NotApplicable,
    Ready(Vec<String>),
    /// Addresses are expected but not assigned yet
    Pending(String),
}

/// Failure to read the objects addresses are derived from
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("failed to read {identity} for addresses: {source}")]
    Fetch {
        identity: ObjectIdentity,
        #[source]
        source: StoreError,
    },

    #[error("failed to decode {identity} for addresses: {source}")]
    Decode {
        identity: ObjectIdentity,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ComponentFailure {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Converge(#[from] ConvergeError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// First failure of a component; displays as the underlying object error
#[derive(Debug, Error)]
#[error("{failure}")]
pub struct ComponentError {
    pub component: &'static str,
    #[source]
    pub failure: ComponentFailure,
}

impl ComponentError {
    pub fn new(component: &'static str, failure: impl Into<ComponentFailure>) -> Self {
        Self {
            component,
            failure: failure.into(),
        }
    }
}

#[async_trait]
pub trait Component<P>: Send + Sync
where
    P: Sync,
{
    fn name(&self) -> &'static str;

    /// Render every object of the component with its desired state, in
    /// declaration order
    fn plan(&self, parent: &P) -> Result<Vec<PlannedObject>, RenderError>;

    async fn addresses(&self, _parent: &P, _engine: &Engine) -> Result<AddressLookup, AddressError> {
        Ok(AddressLookup::NotApplicable)
    }
}

/// Converges the objects of one component, stopping at the first failure
#[derive(Debug, Clone, Copy)]
pub struct ComponentReconciler<'a> {
    engine: &'a Engine,
}

impl<'a> ComponentReconciler<'a> {
    #[must_use]
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    #[allow(
        clippy::missing_errors_doc,
        reason = "Returns the first render or convergence failure of the component"
    )]
    pub async fn reconcile<P>(
        &self,
        component: &dyn Component<P>,
        parent: &P,
    ) -> Result<Vec<ReconcileOutcome>, ComponentError>
    where
        P: Sync,
    {
        let name = component.name();
        let planned = component.plan(parent).map_err(|e| {
            metrics::increment_component_errors(name);
            ComponentError::new(name, e)
        })?;

        if planned.is_empty() {
            debug!(component = name, "component renders no objects");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(planned.len());
        for object in &planned {
            match self.engine.apply(object).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(
                        component = name,
                        object = %e.identity(),
                        reason = e.reason(),
                        "component failed: {}",
                        e
                    );
                    metrics::increment_component_errors(name);
                    return Err(ComponentError::new(name, e));
                }
            }
        }
        debug!(
            component = name,
            objects = outcomes.len(),
            written = outcomes.iter().filter(|o| o.wrote()).count(),
            "component converged"
        );
        Ok(outcomes)
    }
}
