//! pg-companion-operator library crate
//!
//! Renders and reconciles the Deployments and Services behind `Pooler`
//! (PgBouncer) and `PgAdmin` custom resources.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod leader_election;
pub mod podspec;
pub mod resources;

pub use config::OperatorConfig;
pub use controller::context::Shutdown;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::utils::Predicate;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::component::ManagedComponent;
use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use controller::store::KubeStore;
use crd::{PgAdmin, Pooler};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed parent stream.
///
/// Only spec changes (generation) and annotation changes wake the
/// controller; the pod-spec reconciliation flag is an annotation.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation.combine(predicates::annotations));
    (reader, stream)
}

/// Run the controller for one parent kind until `ctx.shutdown.drain` fires.
async fn run_component_controller<P>(
    client: Client,
    ctx: Arc<Context<KubeStore>>,
    namespace: Option<&str>,
) where
    P: ManagedComponent,
{
    let kind = P::kind(&()).to_string();
    info!(
        kind = %kind,
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controller"
    );

    let parents: Api<P> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client, namespace);

    let watcher_config = default_watcher_config();
    let (reader, parent_stream) = create_filtered_stream(parents, watcher_config.clone());

    // Deployments are watched in full for readyReplicas; Services only need
    // change notifications.
    Controller::for_stream(parent_stream, reader)
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config).touched_objects())
        .graceful_shutdown_on(ctx.shutdown.drain.clone().cancelled_owned())
        .run(reconcile::<P, KubeStore>, error_policy::<P, KubeStore>, ctx)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!(kind = %kind, name = %obj.name, "Reconciled");
                    }
                    Err(e) => {
                        let is_not_found = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(_) => true,
                            kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                                err.is_not_found()
                            }
                            _ => false,
                        };
                        if is_not_found {
                            debug!(kind = %kind, "Object no longer exists (likely deleted): {:?}", e);
                        } else {
                            error!(kind = %kind, "Reconciliation error: {:?}", e);
                        }
                    }
                }
            }
        })
        .await;

    info!(kind = %kind, "Controller stopped");
}

/// Run the Pooler and PgAdmin controllers.
///
/// Watches are scoped to `config.watch_namespace` when set. Both controllers
/// stop taking new work once `shutdown.drain` fires and return when their
/// in-flight passes finish; `shutdown.abort` cuts those passes short.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    shutdown: Shutdown,
) {
    if let Some(ref state) = health_state {
        state.set_ready(true);
    }

    let namespace = config.watch_namespace.clone();
    let ctx = Arc::new(Context::new(client.clone(), config, health_state, shutdown));

    futures::join!(
        run_component_controller::<Pooler>(client.clone(), ctx.clone(), namespace.as_deref()),
        run_component_controller::<PgAdmin>(client, ctx, namespace.as_deref()),
    );
}
