//! Reconcile passes that meet concurrent writers, outages and shutdown.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use pg_companion_operator::OperatorConfig;
use pg_companion_operator::controller::component::ManagedComponent;
use pg_companion_operator::controller::context::Context;
use pg_companion_operator::controller::error::Error;
use pg_companion_operator::controller::reconciler::{
    ChildAction, RESYNC_INTERVAL, ReconcileReport, ReconcileScope, reconcile, reconcile_component,
};
use pg_companion_operator::crd::Pooler;
use pg_companion_operator::resources::{SPEC_HASH_ANNOTATION, build_children};
use tokio_util::sync::CancellationToken;

use crate::reconcile_tests::{context, reconcile_pooler, spec_hash};
use crate::{Fault, MemoryStore, Op, PoolerBuilder};

const NS: &str = "default";

fn desired_deployment(pooler: &Pooler) -> Deployment {
    let config = OperatorConfig::default();
    let policy = pooler.default_policy(&config);
    build_children(pooler, &policy, &config).unwrap().deployment
}

/// Reconcile once, then change the replica count so the Deployment is stale.
async fn stale_deployment(ctx: &Context<MemoryStore>) {
    ctx.store.insert(&PoolerBuilder::default().build());
    reconcile_pooler(ctx, "pooler-rw").await.unwrap();
    let mut pooler: Pooler = ctx.store.fetch(NS, "pooler-rw").unwrap();
    pooler.spec.instances = 2;
    pooler.metadata.generation = Some(2);
    ctx.store.insert(&pooler);
    ctx.store.clear_writes();
}

#[tokio::test]
async fn test_concurrent_identical_create_is_adopted() {
    let ctx = context();
    let pooler = PoolerBuilder::default().build();
    ctx.store.insert(&pooler);
    let theirs = serde_json::to_value(desired_deployment(&pooler)).unwrap();
    ctx.store
        .fail_next::<Deployment>(Op::Create, Fault::CreatedConcurrently(theirs));

    let report = reconcile_pooler(&ctx, "pooler-rw").await.unwrap();

    assert_eq!(
        report,
        ReconcileReport::Synced {
            deployment: ChildAction::Unchanged,
            service: ChildAction::Created,
            status_updated: true,
        }
    );
    assert!(
        ctx.store
            .writes()
            .iter()
            .all(|w| w.kind != "Deployment")
    );
}

#[tokio::test]
async fn test_concurrent_stale_create_is_replaced() {
    let ctx = context();
    let pooler = PoolerBuilder::default().build();
    ctx.store.insert(&pooler);
    let mut theirs = desired_deployment(&pooler);
    theirs.metadata.annotations = None;
    theirs.spec.as_mut().unwrap().replicas = Some(7);
    ctx.store.fail_next::<Deployment>(
        Op::Create,
        Fault::CreatedConcurrently(serde_json::to_value(theirs).unwrap()),
    );

    let report = reconcile_pooler(&ctx, "pooler-rw").await.unwrap();

    assert!(matches!(
        report,
        ReconcileReport::Synced {
            deployment: ChildAction::Updated,
            ..
        }
    ));
    let stored: Deployment = ctx.store.fetch(NS, "pooler-rw-pgbouncer").unwrap();
    assert_eq!(stored.spec.as_ref().unwrap().replicas, Some(1));
    assert_eq!(spec_hash(&stored), spec_hash(&desired_deployment(&pooler)));
}

#[tokio::test]
async fn test_single_conflict_is_retried() {
    let ctx = context();
    stale_deployment(&ctx).await;
    ctx.store
        .fail_next::<Deployment>(Op::Replace, Fault::Conflict);

    let report = reconcile_pooler(&ctx, "pooler-rw").await.unwrap();

    assert!(matches!(
        report,
        ReconcileReport::Synced {
            deployment: ChildAction::Updated,
            ..
        }
    ));
    let stored: Deployment = ctx.store.fetch(NS, "pooler-rw-pgbouncer").unwrap();
    assert_eq!(stored.spec.unwrap().replicas, Some(2));
}

#[tokio::test]
async fn test_second_conflict_surfaces_as_retryable() {
    let ctx = context();
    stale_deployment(&ctx).await;
    ctx.store
        .fail_next::<Deployment>(Op::Replace, Fault::Conflict);
    ctx.store
        .fail_next::<Deployment>(Op::Replace, Fault::Conflict);

    let err = reconcile_pooler(&ctx, "pooler-rw").await.unwrap_err();

    assert!(matches!(err, Error::Conflict { ref kind, .. } if kind == "Deployment"));
    assert!(err.is_retryable());
    assert_eq!(ctx.store.write_count(), 0);
    let stored: Deployment = ctx.store.fetch(NS, "pooler-rw-pgbouncer").unwrap();
    assert_eq!(stored.spec.unwrap().replicas, Some(1));
}

#[tokio::test]
async fn test_transient_failure_is_not_retried_in_pass() {
    let ctx = context();
    ctx.store.insert(&PoolerBuilder::default().build());
    ctx.store
        .fail_next::<Deployment>(Op::Create, Fault::Transient);

    let err = reconcile_pooler(&ctx, "pooler-rw").await.unwrap_err();

    assert!(matches!(err, Error::Transient(_)));
    assert!(err.is_retryable());
    assert_eq!(ctx.store.write_count(), 0);
    assert!(ctx.store.fetch::<Service>(NS, "pooler-rw-pgbouncer").is_none());

    // The next pass picks up where this one stopped.
    let report = reconcile_pooler(&ctx, "pooler-rw").await.unwrap();
    assert_eq!(report.writes(), 3);
}

#[tokio::test]
async fn test_status_patch_failure_leaves_children_in_place() {
    let ctx = context();
    ctx.store.insert(&PoolerBuilder::default().build());
    ctx.store
        .fail_next::<Pooler>(Op::PatchStatus, Fault::Transient);

    let err = reconcile_pooler(&ctx, "pooler-rw").await.unwrap_err();

    assert!(matches!(err, Error::Transient(_)));
    assert!(ctx.store.fetch::<Deployment>(NS, "pooler-rw-pgbouncer").is_some());
    assert!(ctx.store.fetch::<Service>(NS, "pooler-rw-pgbouncer").is_some());
    assert!(ctx.store.fetch::<Pooler>(NS, "pooler-rw").unwrap().status.is_none());
}

#[tokio::test]
async fn test_cancelled_pass_writes_nothing() {
    let ctx = context();
    ctx.store.insert(&PoolerBuilder::default().build());
    let token = CancellationToken::new();
    token.cancel();

    let err = reconcile_component::<Pooler, MemoryStore>(
        &ctx,
        NS,
        "pooler-rw",
        &ReconcileScope::new(token),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(ctx.store.write_count(), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_a_hanging_call() {
    let ctx = context();
    ctx.store.insert(&PoolerBuilder::default().build());
    ctx.store.fail_next::<Deployment>(Op::Get, Fault::Hang);
    let token = CancellationToken::new();
    let scope = ReconcileScope::new(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = reconcile_component::<Pooler, MemoryStore>(&ctx, NS, "pooler-rw", &scope)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(ctx.store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_a_hanging_call() {
    let ctx = context();
    ctx.store.insert(&PoolerBuilder::default().build());
    ctx.store.fail_next::<Service>(Op::Get, Fault::Hang);
    let scope = ReconcileScope::new(CancellationToken::new()).with_timeout(Duration::from_secs(30));

    let err = reconcile_component::<Pooler, MemoryStore>(&ctx, NS, "pooler-rw", &scope)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(err.is_retryable());
    // The Deployment was written before the Service lookup hung.
    let deployment: Deployment = ctx.store.fetch(NS, "pooler-rw-pgbouncer").unwrap();
    assert!(
        deployment
            .metadata
            .annotations
            .unwrap()
            .contains_key(SPEC_HASH_ANNOTATION)
    );
}

#[tokio::test(start_paused = true)]
async fn test_draining_lets_an_in_flight_pass_finish() {
    let ctx = Arc::new(context());
    ctx.store.insert(&PoolerBuilder::default().build());
    let pooler = Arc::new(ctx.store.fetch::<Pooler>(NS, "pooler-rw").unwrap());
    ctx.store
        .fail_next::<Deployment>(Op::Get, Fault::Delay(Duration::from_millis(50)));

    let drain = ctx.shutdown.drain.clone();
    let drainer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain.cancel();
    });
    let action = reconcile::<Pooler, MemoryStore>(pooler, ctx.clone()).await.unwrap();
    drainer.await.unwrap();

    assert!(ctx.shutdown.drain.is_cancelled());
    assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
    assert_eq!(ctx.store.write_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_an_in_flight_pass() {
    let ctx = Arc::new(context());
    ctx.store.insert(&PoolerBuilder::default().build());
    let pooler = Arc::new(ctx.store.fetch::<Pooler>(NS, "pooler-rw").unwrap());
    ctx.store
        .fail_next::<Deployment>(Op::Get, Fault::Delay(Duration::from_millis(50)));

    let abort = ctx.shutdown.abort.clone();
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        abort.cancel();
    });
    let err = reconcile::<Pooler, MemoryStore>(pooler, ctx.clone())
        .await
        .unwrap_err();
    aborter.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(ctx.store.write_count(), 0);
}
