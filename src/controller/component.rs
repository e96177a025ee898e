//! Parent kinds the reconciler manages.
//!
//! [`ManagedComponent`] is what the generic reconcile path needs to know about
//! a parent: its naming, its partial pod template, its replica count and its
//! default policy. `Pooler` and `PgAdmin` implement it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use serde::Serialize;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::controller::store::StoredObject;
use crate::controller::validation::{parent_ref, validate_cluster_reference, validate_component};
use crate::crd::{ComponentStatus, PgAdmin, PgAdminSpec, Pooler, PoolerSpec};
use crate::resources::common::{CLUSTER_LABEL, POOLER_NAME_LABEL};
use crate::resources::defaults::{DefaultPolicy, pgadmin_policy, pgbouncer_policy};

/// A parent resource that owns a Deployment and a Service.
pub trait ManagedComponent: StoredObject {
    /// Child name suffix and `app.kubernetes.io/name` value.
    const COMPONENT: &'static str;
    /// `app.kubernetes.io/component` value.
    const ROLE: &'static str;
    /// Path of the replica field, for error messages.
    const REPLICAS_FIELD: &'static str;

    type Spec: Serialize + Send + Sync;

    fn spec(&self) -> &Self::Spec;

    /// User-supplied partial pod template.
    fn template(&self) -> Option<&PodTemplateSpec>;

    fn replicas(&self) -> i32;

    fn default_policy(&self, config: &OperatorConfig) -> DefaultPolicy;

    /// Labels added on top of the standard set.
    fn extra_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn deployment_strategy(&self) -> Option<DeploymentStrategy> {
        None
    }

    fn status(&self) -> Option<&ComponentStatus>;

    fn validate(&self, policy: &DefaultPolicy) -> Result<()> {
        validate_component(self, policy)
    }
}

impl ManagedComponent for Pooler {
    const COMPONENT: &'static str = "pgbouncer";
    const ROLE: &'static str = "pooler";
    const REPLICAS_FIELD: &'static str = "spec.instances";

    type Spec = PoolerSpec;

    fn spec(&self) -> &PoolerSpec {
        &self.spec
    }

    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.template.as_ref()
    }

    fn replicas(&self) -> i32 {
        self.spec.instances
    }

    fn default_policy(&self, config: &OperatorConfig) -> DefaultPolicy {
        pgbouncer_policy(self, config)
    }

    fn extra_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(CLUSTER_LABEL.to_string(), self.spec.cluster.name.clone());
        labels.insert(POOLER_NAME_LABEL.to_string(), self.name_any());
        labels
    }

    fn deployment_strategy(&self) -> Option<DeploymentStrategy> {
        self.spec.deployment_strategy.clone()
    }

    fn status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }

    fn validate(&self, policy: &DefaultPolicy) -> Result<()> {
        validate_cluster_reference(&parent_ref(self), &self.spec.cluster)?;
        validate_component(self, policy)
    }
}

impl ManagedComponent for PgAdmin {
    const COMPONENT: &'static str = "pgadmin";
    const ROLE: &'static str = "admin-console";
    const REPLICAS_FIELD: &'static str = "spec.replicas";

    type Spec = PgAdminSpec;

    fn spec(&self) -> &PgAdminSpec {
        &self.spec
    }

    fn template(&self) -> Option<&PodTemplateSpec> {
        self.spec.template.as_ref()
    }

    fn replicas(&self) -> i32 {
        self.spec.replicas
    }

    fn default_policy(&self, config: &OperatorConfig) -> DefaultPolicy {
        pgadmin_policy(self, config)
    }

    fn status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }
}
