//! Desired child objects and how they overwrite stored ones.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::OperatorConfig;
use crate::controller::component::ManagedComponent;
use crate::controller::error::Result;
use crate::controller::store::StoredObject;
use crate::resources::defaults::DefaultPolicy;
use crate::resources::deployment::generate_deployment;
use crate::resources::service::generate_service;

/// The desired children of one parent.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildObjects {
    pub deployment: Deployment,
    pub service: Service,
}

/// Build every child object for a parent.
pub fn build_children<P: ManagedComponent>(
    parent: &P,
    policy: &DefaultPolicy,
    config: &OperatorConfig,
) -> Result<ChildObjects> {
    Ok(ChildObjects {
        deployment: generate_deployment(parent, policy, config)?,
        service: generate_service(parent, policy)?,
    })
}

/// Options for turning a desired object into a replacement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Keep the stored pod template (user-managed pod spec).
    pub keep_pod_template: bool,
}

/// A child kind the reconciler writes.
pub trait ChildObject: StoredObject {
    /// Produce the object to send on replace.
    ///
    /// The result carries `desired` content on top of `current` identity:
    /// resource version, uid and any labels or annotations other writers
    /// added are kept.
    fn prepare_update(current: &Self, desired: Self, options: UpdateOptions) -> Self;
}

fn merge_metadata(current: &ObjectMeta, desired: ObjectMeta) -> ObjectMeta {
    let mut labels = current.labels.clone().unwrap_or_default();
    labels.extend(desired.labels.unwrap_or_default());
    let mut annotations = current.annotations.clone().unwrap_or_default();
    annotations.extend(desired.annotations.unwrap_or_default());

    ObjectMeta {
        labels: Some(labels),
        annotations: Some(annotations),
        owner_references: desired.owner_references,
        ..current.clone()
    }
}

impl ChildObject for Deployment {
    fn prepare_update(current: &Self, desired: Self, options: UpdateOptions) -> Self {
        let mut spec = desired.spec;
        if let (true, Some(spec), Some(stored)) =
            (options.keep_pod_template, spec.as_mut(), current.spec.as_ref())
        {
            spec.template = stored.template.clone();
        }
        Deployment {
            metadata: merge_metadata(&current.metadata, desired.metadata),
            spec,
            status: current.status.clone(),
        }
    }
}

impl ChildObject for Service {
    fn prepare_update(current: &Self, desired: Self, _options: UpdateOptions) -> Self {
        let mut spec = desired.spec;
        if let (Some(spec), Some(stored)) = (spec.as_mut(), current.spec.as_ref()) {
            // Server-assigned and immutable once set.
            spec.cluster_ip = stored.cluster_ip.clone();
            spec.cluster_ips = stored.cluster_ips.clone();
            spec.ip_families = stored.ip_families.clone();
            spec.ip_family_policy = stored.ip_family_policy.clone();
        }
        Service {
            metadata: merge_metadata(&current.metadata, desired.metadata),
            spec,
            status: current.status.clone(),
        }
    }
}
