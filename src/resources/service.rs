//! Service generation for managed components.
//!
//! One ClusterIP Service per component, selecting the component's pods and
//! exposing the policy's endpoint port.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use serde::Serialize;

use crate::controller::component::ManagedComponent;
use crate::controller::error::Result;
use crate::resources::common::{child_metadata, selector_labels};
use crate::resources::defaults::DefaultPolicy;
use crate::resources::fingerprint::fingerprint;

#[derive(Serialize)]
struct ServiceHashInput<'a> {
    component: &'a str,
    spec: &'a ServiceSpec,
}

/// Generate the Service for a component.
pub fn generate_service<P: ManagedComponent>(parent: &P, policy: &DefaultPolicy) -> Result<Service> {
    let endpoint = &policy.endpoint;
    let spec = ServiceSpec {
        type_: Some("ClusterIP".to_string()),
        selector: Some(selector_labels(parent)),
        ports: Some(vec![ServicePort {
            name: Some(endpoint.name.clone()),
            port: endpoint.port,
            target_port: Some(endpoint.target_port.clone()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let mut metadata = child_metadata(parent);
    fingerprint(&ServiceHashInput {
        component: P::COMPONENT,
        spec: &spec,
    })?
    .stamp(&mut metadata);

    Ok(Service {
        metadata,
        spec: Some(spec),
        ..Default::default()
    })
}
