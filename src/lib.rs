//! # Mesh Operator
//!
//! Converges service mesh control planes and gateways toward the state declared
//! in `MeshControlPlane` and `MeshGateway` resources.
//!
//! ## Module Structure
//!
//! - `engine` - generic desired-state convergence against a versioned store
//! - `components` - the objects a control plane and a gateway consist of
//! - `controller` - reconciliation passes, status lifecycle, backoff, HTTP server
//! - `runtime` - start-up, error policy and the watch loop
//! - `crd` - custom resource definitions
//! - `config`, `constants`, `observability` - ambient configuration, logging, metrics

pub mod components;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod engine;
pub mod observability;
pub mod runtime;
