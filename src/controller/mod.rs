//! # Controller
//!
//! - `backoff`: Fibonacci backoff for failing parents
//! - `reconciler`: reconciliation passes, components and the status lifecycle
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
