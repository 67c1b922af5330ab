//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `mesh_operator_reconciliations_total` - Reconciliation passes by parent kind
//! - `mesh_operator_reconciliation_errors_total` - Failed passes by parent kind
//! - `mesh_operator_reconciliation_duration_seconds` - Duration of passes by parent kind
//! - `mesh_operator_object_operations_total` - Object convergence outcomes by kind and outcome
//! - `mesh_operator_conflict_retries_total` - Writes retried after an optimistic concurrency conflict
//! - `mesh_operator_invalid_recreations_total` - Objects deleted and recreated after an invalid update
//! - `mesh_operator_component_errors_total` - Component failures by component name
//! - `mesh_operator_pending_requeues_total` - Passes requeued while an address is pending
//! - `mesh_operator_status_updates_total` - Parent status writes by lifecycle state
//! - `mesh_operator_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_reconciliations_total",
            "Total number of reconciliation passes by parent kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_reconciliation_errors_total",
            "Total number of failed reconciliation passes by parent kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "mesh_operator_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds by parent kind",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_object_operations_total",
            "Total number of object convergence outcomes by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create OBJECT_OPERATIONS_TOTAL metric - this should never happen")
});

static CONFLICT_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_conflict_retries_total",
            "Total number of writes retried after a concurrency conflict",
        ),
        &["operation"],
    )
    .expect("Failed to create CONFLICT_RETRIES_TOTAL metric - this should never happen")
});

static INVALID_RECREATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_invalid_recreations_total",
            "Total number of objects recreated after an update was rejected as invalid",
        ),
        &["kind"],
    )
    .expect("Failed to create INVALID_RECREATIONS_TOTAL metric - this should never happen")
});

static COMPONENT_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_component_errors_total",
            "Total number of component failures by component",
        ),
        &["component"],
    )
    .expect("Failed to create COMPONENT_ERRORS_TOTAL metric - this should never happen")
});

static PENDING_REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_pending_requeues_total",
            "Total number of passes requeued while an address is pending",
        ),
        &["kind"],
    )
    .expect("Failed to create PENDING_REQUEUES_TOTAL metric - this should never happen")
});

static STATUS_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_status_updates_total",
            "Total number of parent status writes by lifecycle state",
        ),
        &["state"],
    )
    .expect("Failed to create STATUS_UPDATES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "mesh_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECT_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICT_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_RECREATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMPONENT_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PENDING_REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_object_operations(kind: &str, outcome: &str) {
    OBJECT_OPERATIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn increment_conflict_retries(operation: &str) {
    CONFLICT_RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_invalid_recreations(kind: &str) {
    INVALID_RECREATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_component_errors(component: &str) {
    COMPONENT_ERRORS_TOTAL.with_label_values(&[component]).inc();
}

pub fn increment_pending_requeues(kind: &str) {
    PENDING_REQUEUES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_status_updates(state: &str) {
    STATUS_UPDATES_TOTAL.with_label_values(&[state]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
