//! Types shared by the `Pooler` and `PgAdmin` custom resources.

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

/// API group shared by every custom resource of this operator.
pub const API_GROUP: &str = "postgresql.cnpg.io";
/// API version shared by every custom resource of this operator.
pub const API_VERSION: &str = "v1";

/// Parent annotation that hands pod template ownership to the user.
pub const RECONCILE_POD_SPEC_ANNOTATION: &str = "cnpg.io/reconcilePodSpec";

/// Observed state of a managed component.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Desired number of instances.
    #[serde(default)]
    pub instances: i32,

    /// Number of ready instances reported by the child Deployment.
    #[serde(default)]
    pub ready_instances: i32,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ComponentStatus {
    /// Compare two statuses ignoring condition timestamps and messages.
    pub fn is_equivalent(&self, other: &ComponentStatus) -> bool {
        self.instances == other.instances
            && self.ready_instances == other.ready_instances
            && self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(other.conditions.iter())
                .all(|(a, b)| a.r#type == b.r#type && a.status == b.status && a.reason == b.reason)
    }
}

/// Condition describes the state of a component at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }
}

/// Schema for embedded Kubernetes objects (pod templates, strategies).
///
/// k8s-openapi types carry no JsonSchema impl; the API server keeps the
/// payload verbatim and the typed fields are validated on the child object.
pub fn embedded_object_schema(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
