//! # Orchestrator
//!
//! Runs the registered components of a parent strictly in order and gathers the
//! addresses they expose once all of them converged.

use crate::controller::reconciler::component::{
    AddressLookup, Component, ComponentError, ComponentReconciler,
};
use crate::engine::reconciler::Engine;
use tracing::{debug, info};

/// Ordered components of one parent kind, built once at start-up
pub struct ComponentRegistry<P: Sync> {
    components: Vec<Box<dyn Component<P>>>,
}

impl<P: Sync> std::fmt::Debug for ComponentRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.components.iter().map(|c| c.name()))
            .finish()
    }
}

impl<P: Sync> Default for ComponentRegistry<P> {
    fn default() -> Self {
        Self {
            components: Vec::new(),
        }
    }
}

impl<P: Sync> ComponentRegistry<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component; components run in registration order
    #[must_use]
    pub fn with(mut self, component: impl Component<P> + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.iter().map(|c| c.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Component<P>> + '_ {
        self.components.iter().map(|c| c.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// How a pass over all components ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Converged { addresses: Vec<String> },
    /// Every object converged but an address is not assigned yet
    Pending {
        component: &'static str,
        reason: String,
    },
}

#[derive(Debug)]
pub struct Orchestrator<'a, P: Sync> {
    engine: &'a Engine,
    components: &'a ComponentRegistry<P>,
}

impl<'a, P: Sync> Orchestrator<'a, P> {
    #[must_use]
    pub fn new(engine: &'a Engine, components: &'a ComponentRegistry<P>) -> Self {
        Self { engine, components }
    }

    /// Run one pass.
    ///
    /// The first component error is returned unchanged and the remaining
    /// components are skipped.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Returns the first failing component's error"
    )]
    pub async fn run(&self, parent: &P) -> Result<PassOutcome, ComponentError> {
        let reconciler = ComponentReconciler::new(self.engine);
        for component in self.components.iter() {
            reconciler.reconcile(component, parent).await?;
        }

        let mut addresses: Vec<String> = Vec::new();
        for component in self.components.iter() {
            let lookup = component
                .addresses(parent, self.engine)
                .await
                .map_err(|e| ComponentError::new(component.name(), e))?;
            match lookup {
                AddressLookup::NotApplicable => {}
                AddressLookup::Ready(found) => {
                    for address in found {
                        if !addresses.contains(&address) {
                            addresses.push(address);
                        }
                    }
                }
                AddressLookup::Pending(reason) => {
                    info!(component = component.name(), "address pending: {}", reason);
                    return Ok(PassOutcome::Pending {
                        component: component.name(),
                        reason,
                    });
                }
            }
        }

        debug!(?addresses, "all components converged");
        Ok(PassOutcome::Converged { addresses })
    }
}
