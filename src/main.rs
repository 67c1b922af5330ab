//! # Mesh Operator
//!
//! Watches `MeshControlPlane` and `MeshGateway` resources across all namespaces
//! and converges the objects they declare.
//!
//! ## Features
//!
//! - **Ordered components**: base, control plane, telemetry, ingress and egress gateways
//! - **Feature switches**: each object is present only while every switch guarding it is on
//! - **Three-way diff**: writes only what changed; out-of-band fields are left alone
//! - **Lifecycle status**: `Created`, `Reconciling`, `Available`, `ReconcileFailed`, `Unmanaged`
//! - **Prometheus metrics** and health probes on the HTTP server

use anyhow::Result;
use mesh_operator::runtime::initialization::initialize;
use mesh_operator::runtime::watch_loop::run_watch_loop;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state).await?;
    info!("Mesh operator stopped");
    Ok(())
}
