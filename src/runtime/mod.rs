//! # Runtime
//!
//! Operator start-up and the controller watch loop.
//!
//! - `initialization`: logging, metrics, HTTP server, client and reconciler setup
//! - `watch_loop`: runs the controllers and restarts their streams
//! - `error_policy`: requeue backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
