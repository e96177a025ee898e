//! PgAdmin Custom Resource Definition.
//!
//! A PgAdmin asks the operator to run a pgAdmin web console. The operator
//! renders a Deployment and a Service for it.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{ComponentStatus, embedded_object_schema};

/// PgAdmin is a custom resource for deploying a pgAdmin console.
///
/// Example:
/// ```yaml
/// apiVersion: postgresql.cnpg.io/v1
/// kind: PgAdmin
/// metadata:
///   name: console
/// spec:
///   defaultEmail: dba@example.com
///   replicas: 1
/// ```
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "PgAdmin",
    plural = "pgadmins",
    status = "ComponentStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyInstances"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PgAdminSpec {
    /// Email used for the default pgAdmin account.
    #[serde(default = "default_email")]
    pub default_email: String,

    /// Password for the default pgAdmin account.
    #[serde(default = "default_password")]
    pub default_password: String,

    /// Number of pgAdmin instances (default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image override for pgAdmin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Partial pod template merged with the operator defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "embedded_object_schema")]
    pub template: Option<PodTemplateSpec>,
}

impl Default for PgAdminSpec {
    fn default() -> Self {
        Self {
            default_email: default_email(),
            default_password: default_password(),
            replicas: default_replicas(),
            image: None,
            template: None,
        }
    }
}

fn default_email() -> String {
    "admin@example.com".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_replicas() -> i32 {
    1
}
