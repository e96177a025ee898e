//! Validation of parent specs before any child is written.
//!
//! A spec that fails here can never produce a valid child, so the error is
//! terminal until the parent changes.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Container, PodSpec};
use kube::ResourceExt;

use crate::controller::component::ManagedComponent;
use crate::controller::error::{Error, Result};
use crate::crd::ClusterReference;
use crate::resources::defaults::DefaultPolicy;

/// `namespace/name` used in error messages
pub fn parent_ref<P: ManagedComponent>(parent: &P) -> String {
    format!(
        "{}/{}",
        parent.namespace().unwrap_or_default(),
        parent.name_any()
    )
}

/// Checks shared by every component.
pub fn validate_component<P: ManagedComponent>(parent: &P, policy: &DefaultPolicy) -> Result<()> {
    let name = parent_ref(parent);
    validate_replicas(&name, P::REPLICAS_FIELD, parent.replicas())?;
    if let Some(spec) = parent.template().and_then(|t| t.spec.as_ref()) {
        validate_pod_spec(&name, spec, policy)?;
    }
    Ok(())
}

/// Replica counts may be zero (scaled down) but never negative.
pub fn validate_replicas(parent: &str, field: &str, replicas: i32) -> Result<()> {
    if replicas < 0 {
        return Err(Error::invalid_spec(
            parent,
            field,
            format!("replica count {replicas} must not be negative"),
        ));
    }
    Ok(())
}

/// The pooler must name the cluster it serves.
pub fn validate_cluster_reference(parent: &str, cluster: &ClusterReference) -> Result<()> {
    if cluster.name.trim().is_empty() {
        return Err(Error::invalid_spec(
            parent,
            "spec.cluster.name",
            "cluster name must not be empty",
        ));
    }
    Ok(())
}

/// Reject user templates the merge could only turn into an invalid pod.
pub fn validate_pod_spec(parent: &str, spec: &PodSpec, policy: &DefaultPolicy) -> Result<()> {
    let init = spec.init_containers.as_deref().unwrap_or_default();

    check_unique(parent, "spec.template.spec.containers", &spec.containers)?;
    check_unique(parent, "spec.template.spec.initContainers", init)?;

    if init.iter().any(|c| c.name == policy.container) {
        return Err(Error::invalid_spec(
            parent,
            "spec.template.spec.initContainers",
            format!(
                "container {:?} is managed by the operator and cannot be an init container",
                policy.container
            ),
        ));
    }
    if let Some(bootstrap) = &policy.bootstrap {
        if spec.containers.iter().any(|c| c.name == bootstrap.name) {
            return Err(Error::invalid_spec(
                parent,
                "spec.template.spec.containers",
                format!(
                    "{:?} is reserved for the operator's init container",
                    bootstrap.name
                ),
            ));
        }
    }
    Ok(())
}

fn check_unique(parent: &str, field: &str, containers: &[Container]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for container in containers {
        if !seen.insert(container.name.as_str()) {
            return Err(Error::invalid_spec(
                parent,
                field,
                format!("duplicate container name {:?}", container.name),
            ));
        }
    }
    Ok(())
}
