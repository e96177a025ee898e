//! Status management utilities.
//!
//! Provides helpers for building and updating resource status conditions.

use k8s_openapi::api::apps::v1::Deployment;

use crate::crd::{ComponentStatus, Condition};

/// Builder for managing conditions list
#[derive(Default)]
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Start from previously reported conditions.
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// The previous transition time is kept when the status did not flip.
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition
                    .last_transition_time
                    .clone_from(&existing.last_transition_time);
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Ready replicas reported by a Deployment.
pub fn ready_replicas(deployment: Option<&Deployment>) -> i32 {
    deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Compute a parent's status from its desired and ready instance counts.
pub fn compute_status(
    desired: i32,
    ready: i32,
    generation: Option<i64>,
    previous: Option<&ComponentStatus>,
) -> ComponentStatus {
    let mut conditions =
        ConditionBuilder::from_existing(previous.map(|s| s.conditions.as_slice()).unwrap_or_default());
    if ready >= desired {
        conditions.ready(
            true,
            "AllInstancesReady",
            &format!("{ready}/{desired} instances ready"),
            generation,
        );
    } else {
        conditions.ready(
            false,
            "InstancesNotReady",
            &format!("{ready}/{desired} instances ready"),
            generation,
        );
    }

    ComponentStatus {
        instances: desired,
        ready_instances: ready,
        observed_generation: generation,
        conditions: conditions.build(),
    }
}
