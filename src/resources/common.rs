//! Common resource generation utilities.
//!
//! Naming, labels and owner references shared by every child object.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::controller::component::ManagedComponent;
use crate::crd::RECONCILE_POD_SPEC_ANNOTATION;

/// Value of `app.kubernetes.io/managed-by` on every child object
pub const MANAGED_BY: &str = "pg-companion-operator";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const CLUSTER_LABEL: &str = "cnpg.io/cluster";
pub const POOLER_NAME_LABEL: &str = "cnpg.io/poolerName";

/// Name of a child object: `<parent>-<component>`.
pub fn child_name<P: ManagedComponent>(parent: &P) -> String {
    format!("{}-{}", parent.name_any(), P::COMPONENT)
}

/// Standard labels applied to all child objects and their pods
pub fn standard_labels<P: ManagedComponent>(parent: &P) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), P::COMPONENT.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), parent.name_any());
    labels.insert(COMPONENT_LABEL.to_string(), P::ROLE.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.extend(parent.extra_labels());
    labels
}

/// Labels used by Deployment and Service selectors
pub fn selector_labels<P: ManagedComponent>(parent: &P) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), parent.name_any());
    labels.insert(COMPONENT_LABEL.to_string(), P::ROLE.to_string());
    labels
}

/// Controller owner reference pointing at the parent
pub fn owner_reference<P: ManagedComponent>(parent: &P) -> OwnerReference {
    OwnerReference {
        api_version: P::api_version(&()).to_string(),
        kind: P::kind(&()).to_string(),
        name: parent.name_any(),
        uid: parent.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether the parent hands pod template ownership to the user.
pub fn is_pod_spec_reconciliation_disabled(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(RECONCILE_POD_SPEC_ANNOTATION))
        .is_some_and(|v| v == "disabled")
}

/// Child metadata common to Deployments and Services.
pub fn child_metadata<P: ManagedComponent>(parent: &P) -> ObjectMeta {
    ObjectMeta {
        name: Some(child_name(parent)),
        namespace: parent.namespace(),
        labels: Some(standard_labels(parent)),
        owner_references: Some(vec![owner_reference(parent)]),
        ..Default::default()
    }
}
