//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the operator's custom resources
pub const API_GROUP: &str = "mesh.octopilot.io";

/// Annotation holding the last-applied record of a managed object
pub const LAST_APPLIED_ANNOTATION: &str = "mesh.octopilot.io/last-applied";

/// Pod template annotation carrying the mesh configuration hash
pub const CONFIG_HASH_ANNOTATION: &str = "mesh.octopilot.io/config-hash";

/// Field manager recorded on every write
pub const DEFAULT_FIELD_MANAGER: &str = "mesh-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Requeue interval while an externally observable address is pending (seconds)
pub const DEFAULT_PENDING_REQUEUE_SECS: u64 = 30;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Fibonacci error backoff lower bound (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;

/// Fibonacci error backoff upper bound (minutes)
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Watch stream backoff starting value when the API server throttles (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Watch stream backoff maximum value (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default number of parents reconciled concurrently
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Namespace for parents that carry none
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "mesh-system";

/// Default proxy and control plane image tag
pub const DEFAULT_MESH_VERSION: &str = "1.22.3";

/// Default image registry for mesh components
pub const DEFAULT_IMAGE_HUB: &str = "docker.io/istio";
