//! Shared context for the controllers.
//!
//! The Context holds what every reconcile pass needs: the object store, the
//! operator configuration, the event recorder and the shutdown signals.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::controller::store::{FIELD_MANAGER, KubeStore, ObjectStore};
use crate::health::HealthState;
use crate::resources::DefaultPolicy;

/// Two-phase stop signal.
///
/// `drain` stops the controllers from starting new passes; passes already
/// running carry on. `abort` interrupts those passes at their next store call.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    pub drain: CancellationToken,
    pub abort: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared context for the controllers
pub struct Context<S = KubeStore> {
    /// Object store used for every read and write
    pub store: S,
    /// Operator configuration
    pub config: OperatorConfig,
    pub shutdown: Shutdown,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Rendered in place of each kind's own defaults when set.
    pub policy_override: Option<DefaultPolicy>,
    recorder: Option<Recorder>,
}

impl Context<KubeStore> {
    /// Create a context backed by the Kubernetes API
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
        shutdown: Shutdown,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            store: KubeStore::new(client.clone()),
            config,
            shutdown,
            health_state,
            policy_override: None,
            recorder: Some(Recorder::new(client, reporter)),
        }
    }
}

impl<S: ObjectStore> Context<S> {
    /// Create a context around an arbitrary store, without events or metrics
    pub fn with_store(store: S, config: OperatorConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Shutdown::new(),
            health_state: None,
            policy_override: None,
            recorder: None,
        }
    }

    /// Render every parent with `policy` instead of its kind's defaults.
    ///
    /// The policy is not part of the child fingerprints, so it must stay fixed
    /// for the life of the context.
    pub fn with_policy(mut self, policy: DefaultPolicy) -> Self {
        self.policy_override = Some(policy);
        self
    }

    /// Record a child write in the metrics, if enabled
    pub fn record_child_write(&self, kind: &str, action: &str) {
        if let Some(ref health_state) = self.health_state {
            health_state.metrics.record_child_write(kind, action);
        }
    }

    async fn publish<K>(&self, resource: &K, type_: EventType, reason: &str, action: &str, note: Option<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
