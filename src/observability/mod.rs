//! # Observability
//!
//! Prometheus metrics and tracing subscriber setup.

pub mod metrics;
pub mod logging;
