//! # Status Tests
//!
//! Whole passes over parents through the reconciler, checking the lifecycle
//! recorded on their status:
//!
//! - `Created` and `Reconciling` on a first pass
//! - pending addresses requeue without a status write
//! - `Available` with addresses once the gateway reports them
//! - `ReconcileFailed` with the first error message
//! - `Unmanaged` for suspended parents
//! - conflict retry and the whole-object fallback for status writes

mod common;

use common::{
    assign_load_balancer_ip, control_plane, engine, stored_control_plane, stored_gateway,
    Failure, MemoryStore, Op, NAMESPACE,
};
use kube_runtime::controller::Action;
use mesh_operator::components::{self, mesh_gateways::INGRESS_GATEWAY_NAME};
use mesh_operator::config::ControllerConfig;
use mesh_operator::controller::reconciler::{
    reconcile_control_plane, reconcile_gateway, PassResult, Reconciler, ReconcilerError,
    StatusError, StatusStateMachine, StatusUpdate,
};
use mesh_operator::crd::{ConfigState, MeshControlPlane};
use std::sync::Arc;
use std::time::Duration;

fn reconciler(store: &MemoryStore) -> Reconciler {
    Reconciler::new(
        engine(store),
        components::control_plane_components(),
        components::gateway_components(),
        ControllerConfig::default(),
    )
}

fn state(parent: &MeshControlPlane) -> Option<ConfigState> {
    parent.status.as_ref().and_then(|s| s.state)
}

#[tokio::test]
async fn test_first_pass_records_reconciling_and_waits_for_ingress() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|_| {}));

    let result = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap();

    assert!(
        matches!(result, PassResult::Pending { component: "ingress-gateway", .. }),
        "got {result:?}"
    );
    let statuses: Vec<_> = store
        .writes()
        .into_iter()
        .filter(|w| w.starts_with("updatestatus"))
        .collect();
    assert_eq!(statuses.len(), 2, "Created then Reconciling");
    assert_eq!(state(&stored_control_plane(&store)), Some(ConfigState::Reconciling));
}

#[tokio::test]
async fn test_addresses_flow_from_service_to_control_plane() {
    let store = MemoryStore::new();
    let reconciler = reconciler(&store);
    let control_plane_components = components::control_plane_components();
    let gateway_components = components::gateway_components();
    store.seed(&control_plane(|_| {}));

    reconciler
        .run_pass(&stored_control_plane(&store), &control_plane_components)
        .await
        .unwrap();

    // The gateway controller picks up the MeshGateway the control plane rendered
    let result = reconciler
        .run_pass(&stored_gateway(&store, INGRESS_GATEWAY_NAME), &gateway_components)
        .await
        .unwrap();
    assert!(
        matches!(result, PassResult::Pending { component: "gateway", .. }),
        "no load balancer ingress yet: {result:?}"
    );

    assign_load_balancer_ip(&store, INGRESS_GATEWAY_NAME, "34.1.2.3");
    let result = reconciler
        .run_pass(&stored_gateway(&store, INGRESS_GATEWAY_NAME), &gateway_components)
        .await
        .unwrap();
    assert_eq!(
        result,
        PassResult::Converged {
            addresses: vec!["34.1.2.3".to_string()]
        }
    );
    let gateway = stored_gateway(&store, INGRESS_GATEWAY_NAME);
    let status = gateway.status.unwrap();
    assert_eq!(status.state, Some(ConfigState::Available));
    assert_eq!(status.observed_generation, Some(1));

    let result = reconciler
        .run_pass(&stored_control_plane(&store), &control_plane_components)
        .await
        .unwrap();
    assert_eq!(
        result,
        PassResult::Converged {
            addresses: vec!["34.1.2.3".to_string()]
        }
    );
    let status = stored_control_plane(&store).status.unwrap();
    assert_eq!(status.state, Some(ConfigState::Available));
    assert_eq!(status.addresses, vec!["34.1.2.3".to_string()]);
    assert_eq!(status.error_message, None);

    // Steady state: nothing left to write
    store.clear_calls();
    reconciler
        .run_pass(&stored_control_plane(&store), &control_plane_components)
        .await
        .unwrap();
    assert!(store.writes().is_empty(), "unexpected writes: {:?}", store.writes());
}

#[tokio::test]
async fn test_failed_pass_records_first_error() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|_| {}));
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);

    let err = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcilerError::Component(ref e) if e.component == "control-plane"));
    let status = stored_control_plane(&store).status.unwrap();
    assert_eq!(status.state, Some(ConfigState::ReconcileFailed));
    assert_eq!(status.observed_generation, Some(1));
    let message = status.error_message.unwrap();
    assert!(
        message.contains("Deployment mesh-system/mesh-pilot") && message.contains("503"),
        "message should carry the first error verbatim: {message}"
    );
}

#[tokio::test]
async fn test_failed_parent_recovers_on_next_pass() {
    let store = MemoryStore::new();
    let reconciler = reconciler(&store);
    let registry = components::control_plane_components();
    store.seed(&control_plane(|_| {}));
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);
    reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap_err();

    let result = reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap();

    assert!(matches!(result, PassResult::Pending { .. }), "got {result:?}");
    let status = stored_control_plane(&store).status.unwrap();
    assert_eq!(status.state, Some(ConfigState::Reconciling));
    assert_eq!(status.error_message, None, "the old error is cleared");
}

#[tokio::test]
async fn test_repeated_failure_leaves_status_untouched() {
    let store = MemoryStore::new();
    let reconciler = reconciler(&store);
    let registry = components::control_plane_components();
    store.seed(&control_plane(|_| {}));
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);
    reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap_err();
    let failed = stored_control_plane(&store).status.unwrap();
    store.clear_calls();

    reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap_err();

    let parent_writes: Vec<_> = store
        .writes()
        .into_iter()
        .filter(|w| w.contains("meshcontrolplane"))
        .collect();
    assert!(
        parent_writes.is_empty(),
        "a second identical failure must not rewrite the parent: {parent_writes:?}"
    );
    let status = stored_control_plane(&store).status.unwrap();
    assert_eq!(status, failed);
}

#[tokio::test]
async fn test_retry_of_failed_generation_reaches_available() {
    let store = MemoryStore::new();
    let reconciler = reconciler(&store);
    let registry = components::control_plane_components();
    store.seed(&control_plane(|spec| spec.gateways.enabled = Some(false)));
    store.fail_next(Op::Create, "Deployment", Failure::Unavailable);
    reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap_err();
    store.clear_calls();

    let result = reconciler
        .run_pass(&stored_control_plane(&store), &registry)
        .await
        .unwrap();

    assert_eq!(result, PassResult::Converged { addresses: Vec::new() });
    let statuses = store
        .writes()
        .into_iter()
        .filter(|w| w.starts_with("updatestatus"))
        .count();
    assert_eq!(statuses, 2, "Reconciling then Available");
    let status = stored_control_plane(&store).status.unwrap();
    assert_eq!(status.state, Some(ConfigState::Available));
    assert_eq!(status.error_message, None);
}

#[tokio::test]
async fn test_suspended_parent_is_only_marked_unmanaged() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|spec| spec.suspend = true));

    let result = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap();

    assert_eq!(result, PassResult::Unmanaged);
    assert_eq!(store.writes(), ["updatestatus meshcontrolplane/mesh"]);
    assert_eq!(state(&stored_control_plane(&store)), Some(ConfigState::Unmanaged));
}

#[tokio::test]
async fn test_disabled_gateways_converge_without_addresses() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|spec| spec.gateways.enabled = Some(false)));

    let result = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap();

    assert_eq!(result, PassResult::Converged { addresses: Vec::new() });
    assert_eq!(store.count("MeshGateway"), 0);
    assert_eq!(state(&stored_control_plane(&store)), Some(ConfigState::Available));
}

#[tokio::test]
async fn test_stale_parent_status_write_is_retried_once() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|spec| spec.gateways.enabled = Some(false)));
    // Someone else writes the parent after it was read
    store.tamper(
        "MeshControlPlane",
        Some(NAMESPACE),
        "mesh",
        &serde_json::json!({"metadata": {"labels": {"edited": "true"}}}),
    );

    let result = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap();

    assert_eq!(result, PassResult::Converged { addresses: Vec::new() });
    let stored = stored_control_plane(&store);
    assert_eq!(state(&stored), Some(ConfigState::Available));
    assert_eq!(
        stored.metadata.labels.unwrap().get("edited").map(String::as_str),
        Some("true"),
        "the retry only reapplies status"
    );
}

#[tokio::test]
async fn test_persistent_status_conflict_fails_the_pass() {
    let store = MemoryStore::new();
    let parent = store.seed(&control_plane(|_| {}));
    store.fail_next(Op::UpdateStatus, "MeshControlPlane", Failure::Conflict);
    store.fail_next(Op::UpdateStatus, "MeshControlPlane", Failure::Conflict);

    let err = reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcilerError::Status(StatusError::Write { .. })), "got {err:?}");
    assert_eq!(store.count("Deployment"), 0, "no objects before status is recorded");
}

#[tokio::test]
async fn test_status_falls_back_to_whole_object_write() {
    let store = MemoryStore::without_status_subresource();
    let parent = store.seed(&control_plane(|spec| spec.gateways.enabled = Some(false)));

    reconciler(&store)
        .run_pass(&parent, &components::control_plane_components())
        .await
        .unwrap();

    assert_eq!(state(&stored_control_plane(&store)), Some(ConfigState::Available));
    assert!(store
        .writes()
        .contains(&"update meshcontrolplane/mesh".to_string()));
}

#[tokio::test]
async fn test_invalid_transition_is_rejected() {
    let store = MemoryStore::new();
    let mut parent = store.seed(&control_plane(|_| {}));
    let status = StatusStateMachine::new(&store);

    assert!(status
        .set_status(&mut parent, StatusUpdate::new(ConfigState::Created))
        .await
        .unwrap());
    assert!(
        !status
            .set_status(&mut parent, StatusUpdate::new(ConfigState::Created))
            .await
            .unwrap(),
        "an identical status is not rewritten"
    );

    let err = status
        .set_status(&mut parent, StatusUpdate::new(ConfigState::Available))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            StatusError::InvalidTransition {
                from: ConfigState::Created,
                to: ConfigState::Available,
                ..
            }
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_controller_actions_follow_pass_result() {
    let store = MemoryStore::new();
    let ctx = Arc::new(reconciler(&store));
    store.seed(&control_plane(|_| {}));

    let action = reconcile_control_plane(Arc::new(stored_control_plane(&store)), Arc::clone(&ctx))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    let action = reconcile_gateway(
        Arc::new(stored_gateway(&store, INGRESS_GATEWAY_NAME)),
        Arc::clone(&ctx),
    )
    .await
    .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    assign_load_balancer_ip(&store, INGRESS_GATEWAY_NAME, "34.1.2.3");
    let action = reconcile_gateway(
        Arc::new(stored_gateway(&store, INGRESS_GATEWAY_NAME)),
        Arc::clone(&ctx),
    )
    .await
    .unwrap();
    assert_eq!(action, Action::await_change());
}

#[test]
fn test_error_backoff_grows_per_parent_and_resets() {
    let ctx = reconciler(&MemoryStore::new());
    let key = "MeshControlPlane/mesh-system/mesh";

    let (first, count) = ctx.next_error_backoff(key).unwrap();
    assert_eq!(count, 1);
    let (second, count) = ctx.next_error_backoff(key).unwrap();
    assert_eq!(count, 2);
    assert!(second >= first);

    let (_, other) = ctx.next_error_backoff("MeshGateway/mesh-system/mesh").unwrap();
    assert_eq!(other, 1, "backoff is tracked per parent");

    ctx.reset_backoff(key);
    assert_eq!(ctx.next_error_backoff(key).unwrap().1, 1);
}

#[test]
fn test_deleted_parent_backoff_is_forgotten() {
    let ctx = reconciler(&MemoryStore::new());
    ctx.next_error_backoff("MeshControlPlane/mesh-system/mesh");
    ctx.next_error_backoff("MeshGateway/mesh-system/mesh-ingressgateway");
    assert_eq!(ctx.tracked_backoffs(), 2);

    ctx.reset_backoff("MeshGateway/mesh-system/mesh-ingressgateway");
    assert_eq!(ctx.tracked_backoffs(), 2, "a reset keeps the entry of a live parent");

    ctx.forget_backoff("MeshControlPlane/mesh-system/mesh");
    assert_eq!(ctx.tracked_backoffs(), 1);
    ctx.forget_backoff("MeshControlPlane/mesh-system/unknown");
    assert_eq!(ctx.tracked_backoffs(), 1);
}
