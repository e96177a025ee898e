//! Pooler Custom Resource Definition.
//!
//! A Pooler asks the operator to run a PgBouncer tier in front of a database
//! cluster. The operator renders a Deployment and a Service for it.

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{ComponentStatus, embedded_object_schema};

/// Pooler is a custom resource for deploying a PgBouncer connection pooler.
///
/// Example:
/// ```yaml
/// apiVersion: postgresql.cnpg.io/v1
/// kind: Pooler
/// metadata:
///   name: pooler-rw
/// spec:
///   cluster:
///     name: cluster-example
///   instances: 2
///   template:
///     spec:
///       containers:
///         - name: pgbouncer
///           resources:
///             limits:
///               cpu: 500m
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "Pooler",
    plural = "poolers",
    status = "ComponentStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster.name"}"#,
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.instances"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyInstances"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PoolerSpec {
    /// The database cluster this pooler connects to.
    pub cluster: ClusterReference,

    /// Number of PgBouncer instances (default 1).
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Partial pod template merged with the operator defaults.
    /// Fields set here win over the operator's defaults unless the operator
    /// must control them (bootstrap container, security context).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "embedded_object_schema")]
    pub template: Option<PodTemplateSpec>,

    /// Deployment strategy copied to the child Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "embedded_object_schema")]
    pub deployment_strategy: Option<DeploymentStrategy>,
}

impl Default for PoolerSpec {
    fn default() -> Self {
        Self {
            cluster: ClusterReference::default(),
            instances: default_instances(),
            template: None,
            deployment_strategy: None,
        }
    }
}

fn default_instances() -> i32 {
    1
}

/// Reference to the database cluster served by a pooler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the cluster in the pooler's namespace.
    pub name: String,
}

impl ClusterReference {
    /// Secret holding the cluster's server CA.
    pub fn server_ca_secret_name(&self) -> String {
        format!("{}-ca", self.name)
    }

    /// Secret holding the cluster's server TLS certificate.
    pub fn server_tls_secret_name(&self) -> String {
        format!("{}-server", self.name)
    }
}
