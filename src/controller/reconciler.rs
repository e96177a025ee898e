//! Reconciliation of managed components.
//!
//! One pass reads the parent, validates it, renders its children and brings
//! each stored child in line with the rendered one. A child is rewritten only
//! when its stored `cnpg.io/specHash` differs from the desired one, so a pass
//! over an unchanged parent performs no writes at all.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::component::ManagedComponent;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{compute_status, ready_replicas};
use crate::controller::store::ObjectStore;
use crate::resources::common::is_pod_spec_reconciliation_disabled;
use crate::resources::{ChildObject, SpecFingerprint, UpdateOptions, build_children};

/// Requeue interval after a successful pass (periodic resync)
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Cancellation and deadline applied to every store call of a pass.
#[derive(Clone, Debug)]
pub struct ReconcileScope {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl ReconcileScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Bound the whole pass to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one store operation under this scope.
    ///
    /// Cancellation wins over completion when both are ready.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .map_err(|_| Error::DeadlineExceeded)?,
                None => operation.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}

/// What happened to one child object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildAction {
    Created,
    Updated,
    Unchanged,
}

impl ChildAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildAction::Created => "created",
            ChildAction::Updated => "updated",
            ChildAction::Unchanged => "unchanged",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, ChildAction::Unchanged)
    }
}

/// A child after synchronisation, as last seen in the store.
#[derive(Clone, Debug)]
pub struct SyncedChild<K> {
    pub action: ChildAction,
    pub object: K,
}

/// Result of one reconcile pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileReport {
    /// The parent no longer exists; nothing was written.
    ParentMissing,
    /// The parent is being deleted; owner references clean up the children.
    ParentDeleting,
    Synced {
        deployment: ChildAction,
        service: ChildAction,
        status_updated: bool,
    },
}

impl ReconcileReport {
    /// Number of writes the pass issued.
    pub fn writes(&self) -> usize {
        match self {
            ReconcileReport::Synced {
                deployment,
                service,
                status_updated,
            } => {
                usize::from(deployment.is_write())
                    + usize::from(service.is_write())
                    + usize::from(*status_updated)
            }
            _ => 0,
        }
    }
}

fn is_up_to_date<K: Resource>(current: &K, wanted: Option<&SpecFingerprint>) -> bool {
    wanted.is_some() && SpecFingerprint::from_metadata(current.meta()).as_ref() == wanted
}

async fn reread<K: ChildObject, S: ObjectStore>(
    store: &S,
    scope: &ReconcileScope,
    namespace: &str,
    name: &str,
) -> Result<K> {
    scope
        .run(store.get::<K>(namespace, name))
        .await?
        .ok_or_else(|| Error::Transient(format!("{} {name} disappeared mid-reconcile", K::kind(&()))))
}

/// Bring one stored child in line with `desired`.
///
/// - absent: create it; if another writer got there first, compare with theirs
/// - fingerprint matches: leave it alone
/// - stale: replace it, re-reading and retrying once on a write conflict
pub async fn sync_child<K: ChildObject, S: ObjectStore>(
    store: &S,
    scope: &ReconcileScope,
    namespace: &str,
    desired: K,
    options: UpdateOptions,
) -> Result<SyncedChild<K>> {
    let name = desired.name_any();
    let kind = K::kind(&());
    let wanted = SpecFingerprint::from_metadata(desired.meta());

    let current = match scope.run(store.get::<K>(namespace, &name)).await? {
        Some(current) => current,
        None => match scope.run(store.create(namespace, &desired)).await {
            Ok(object) => {
                info!(%kind, %name, %namespace, "Created child object");
                return Ok(SyncedChild {
                    action: ChildAction::Created,
                    object,
                });
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!(%kind, %name, "Child created concurrently, comparing");
                reread::<K, S>(store, scope, namespace, &name).await?
            }
            Err(e) => return Err(e),
        },
    };

    if is_up_to_date(&current, wanted.as_ref()) {
        debug!(%kind, %name, "Child up to date");
        return Ok(SyncedChild {
            action: ChildAction::Unchanged,
            object: current,
        });
    }

    let update = K::prepare_update(&current, desired.clone(), options);
    let object = match scope.run(store.replace(namespace, &name, &update)).await {
        Ok(object) => object,
        Err(Error::Conflict { .. }) => {
            debug!(%kind, %name, "Write conflict, retrying once");
            let current = reread::<K, S>(store, scope, namespace, &name).await?;
            if is_up_to_date(&current, wanted.as_ref()) {
                return Ok(SyncedChild {
                    action: ChildAction::Unchanged,
                    object: current,
                });
            }
            let update = K::prepare_update(&current, desired, options);
            scope.run(store.replace(namespace, &name, &update)).await?
        }
        Err(e) => return Err(e),
    };

    info!(
        %kind,
        %name,
        %namespace,
        fingerprint = wanted.as_ref().map(SpecFingerprint::as_str).unwrap_or_default(),
        "Updated child object"
    );
    Ok(SyncedChild {
        action: ChildAction::Updated,
        object,
    })
}

/// Reconcile one parent of kind `P` and its children.
#[instrument(skip(ctx, scope), fields(kind = %P::kind(&())))]
pub async fn reconcile_component<P, S>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
    scope: &ReconcileScope,
) -> Result<ReconcileReport>
where
    P: ManagedComponent,
    S: ObjectStore,
{
    let Some(parent) = scope.run(ctx.store.get::<P>(namespace, name)).await? else {
        debug!("Parent not found, nothing to do");
        return Ok(ReconcileReport::ParentMissing);
    };
    if parent.meta().deletion_timestamp.is_some() {
        debug!("Parent is being deleted");
        return Ok(ReconcileReport::ParentDeleting);
    }

    let policy = ctx
        .policy_override
        .clone()
        .unwrap_or_else(|| parent.default_policy(&ctx.config));
    if let Err(e) = parent.validate(&policy) {
        warn!(error = %e, "Rejecting invalid spec");
        ctx.publish_warning_event(&parent, "InvalidSpec", "Validating", Some(e.to_string()))
            .await;
        return Err(e);
    }

    let children = build_children(&parent, &policy, &ctx.config)?;
    let options = UpdateOptions {
        keep_pod_template: is_pod_spec_reconciliation_disabled(parent.meta()),
    };

    let deployment = sync_child(&ctx.store, scope, namespace, children.deployment, options).await?;
    record_child(ctx, &parent, "Deployment", deployment.action).await;
    let service = sync_child(&ctx.store, scope, namespace, children.service, options).await?;
    record_child(ctx, &parent, "Service", service.action).await;

    let ready = ready_replicas(Some(&deployment.object));
    let status = compute_status(parent.replicas(), ready, parent.meta().generation, parent.status());
    let status_updated = if parent.status().is_some_and(|s| s.is_equivalent(&status)) {
        false
    } else {
        scope
            .run(ctx.store.patch_status::<P>(namespace, name, serde_json::to_value(&status)?))
            .await?;
        true
    };

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.set_instances(
            &P::kind(&()),
            namespace,
            name,
            i64::from(parent.replicas()),
            i64::from(ready),
        );
    }

    Ok(ReconcileReport::Synced {
        deployment: deployment.action,
        service: service.action,
        status_updated,
    })
}

async fn record_child<P, S>(ctx: &Context<S>, parent: &P, kind: &str, action: ChildAction)
where
    P: ManagedComponent,
    S: ObjectStore,
{
    ctx.record_child_write(kind, action.as_str());
    let reason = match action {
        ChildAction::Created => "Created",
        ChildAction::Updated => "Updated",
        ChildAction::Unchanged => return,
    };
    ctx.publish_normal_event(
        parent,
        reason,
        "Reconciling",
        Some(format!("{reason} {kind} {}", crate::resources::common::child_name(parent))),
    )
    .await;
}

/// Reconcile entry point for the kube-runtime controller.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<P, S>(obj: Arc<P>, ctx: Arc<Context<S>>) -> Result<Action>
where
    P: ManagedComponent,
    S: ObjectStore,
{
    let start_time = std::time::Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Tied to `abort`, not `drain`: a draining controller lets this pass finish.
    let scope = ReconcileScope::new(ctx.shutdown.abort.child_token())
        .with_timeout(ctx.config.reconcile_timeout);
    let report = reconcile_component::<P, S>(&ctx, &namespace, &name, &scope).await?;
    debug!(writes = report.writes(), ?report, "Reconciled");

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            &P::kind(&()),
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        health_state.mark_reconciled();
    }

    match report {
        ReconcileReport::ParentMissing | ReconcileReport::ParentDeleting => {
            Ok(Action::await_change())
        }
        ReconcileReport::Synced { .. } => Ok(Action::requeue(RESYNC_INTERVAL)),
    }
}

/// Error policy for the controllers
pub fn error_policy<P, S>(obj: Arc<P>, error: &Error, ctx: Arc<Context<S>>) -> Action
where
    P: ManagedComponent,
    S: ObjectStore,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error(&P::kind(&()), &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    match error {
        Error::InvalidSpec { .. } => {
            warn!(name = %name, error = %error, "Invalid spec, waiting for a change");
            Action::await_change()
        }
        Error::Cancelled => Action::await_change(),
        _ if error.is_retryable() => {
            warn!(name = %name, error = %error, "Retryable error, will retry");
            Action::requeue(error.requeue_after())
        }
        _ => {
            error!(name = %name, error = %error, "Non-retryable error");
            Action::requeue(error.requeue_after())
        }
    }
}
