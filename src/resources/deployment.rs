//! Deployment generation for managed components.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;
use serde::Serialize;

use crate::config::OperatorConfig;
use crate::controller::component::ManagedComponent;
use crate::controller::error::Result;
use crate::podspec::PodTemplateBuilder;
use crate::resources::common::{
    child_metadata, is_pod_spec_reconciliation_disabled, selector_labels, standard_labels,
};
use crate::resources::defaults::DefaultPolicy;
use crate::resources::fingerprint::{SpecFingerprint, fingerprint};

/// Everything a Deployment's content is derived from.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentHashInput<'a, S: Serialize> {
    component: &'a str,
    spec: &'a S,
    pod_spec_reconciliation_disabled: bool,
    operator_image: &'a str,
    defaults: RenderDefaults<'a>,
}

/// Operator settings that end up in the rendered pod template.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderDefaults<'a> {
    pgbouncer_image: &'a str,
    pgadmin_image: &'a str,
    run_as_user: i64,
    run_as_group: i64,
    probe_timeout_seconds: i32,
}

impl<'a> From<&'a OperatorConfig> for RenderDefaults<'a> {
    fn from(config: &'a OperatorConfig) -> Self {
        Self {
            pgbouncer_image: &config.pgbouncer_image,
            pgadmin_image: &config.pgadmin_image,
            run_as_user: config.pod_identity.run_as_user,
            run_as_group: config.pod_identity.run_as_group,
            probe_timeout_seconds: config.probe_timeout_seconds,
        }
    }
}

/// Fingerprint of the inputs that shape a component's Deployment.
pub fn deployment_fingerprint<P: ManagedComponent>(
    parent: &P,
    config: &OperatorConfig,
) -> Result<SpecFingerprint> {
    fingerprint(&DeploymentHashInput {
        component: P::COMPONENT,
        spec: parent.spec(),
        pod_spec_reconciliation_disabled: is_pod_spec_reconciliation_disabled(parent.meta()),
        operator_image: &config.operator_image,
        defaults: config.into(),
    })
}

/// Generate the Deployment for a component.
///
/// The pod template is the user's template with `policy` layered on top and
/// the standard labels forced, so the selector always matches.
pub fn generate_deployment<P: ManagedComponent>(
    parent: &P,
    policy: &DefaultPolicy,
    config: &OperatorConfig,
) -> Result<Deployment> {
    let builder = standard_labels(parent).into_iter().fold(
        policy.apply(PodTemplateBuilder::from_template(parent.template())),
        |builder, (key, value)| builder.with_label(key, value),
    );
    let template = builder.build();

    let mut metadata = child_metadata(parent);
    deployment_fingerprint(parent, config)?.stamp(&mut metadata);

    Ok(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(parent.replicas()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(parent)),
                ..Default::default()
            },
            template,
            strategy: Some(parent.deployment_strategy().unwrap_or_default()),
            ..Default::default()
        }),
        ..Default::default()
    })
}
