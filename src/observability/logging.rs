//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` wins when set; otherwise the configured `LOG_LEVEL` applies to the
//! operator's own targets. `LOG_FORMAT=json` switches to JSON lines.

use crate::config::ControllerConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is unset
#[must_use]
pub fn default_directive(log_level: &str) -> String {
    format!(
        "mesh_operator={},kube_runtime=warn",
        log_level.to_lowercase()
    )
}

/// Install the global subscriber
#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a global subscriber is already installed"
)]
pub fn init(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json_logs() {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
