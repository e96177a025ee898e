//! Test fixtures and builder patterns for Pooler and PgAdmin.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use pg_companion_operator::crd::{
    ClusterReference, PgAdmin, PgAdminSpec, Pooler, PoolerSpec, RECONCILE_POD_SPEC_ANNOTATION,
};

fn metadata(
    name: String,
    namespace: String,
    annotations: BTreeMap<String, String>,
    generation: i64,
    deleting: bool,
) -> ObjectMeta {
    ObjectMeta {
        uid: Some(format!("uid-{name}")),
        name: Some(name),
        namespace: Some(namespace),
        annotations: if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        },
        generation: Some(generation),
        deletion_timestamp: deleting.then(|| Time(k8s_openapi::chrono::Utc::now())),
        ..Default::default()
    }
}

/// Builder for creating Pooler test fixtures.
///
/// # Example
/// ```ignore
/// let pooler = PoolerBuilder::new("pooler-rw")
///     .cluster("cluster-example")
///     .instances(3)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct PoolerBuilder {
    name: String,
    namespace: String,
    cluster: String,
    instances: i32,
    template: Option<PodTemplateSpec>,
    annotations: BTreeMap<String, String>,
    generation: i64,
    deleting: bool,
}

impl PoolerBuilder {
    /// Create a new builder with the given pooler name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            cluster: "cluster-example".to_string(),
            instances: 1,
            template: None,
            annotations: BTreeMap::new(),
            generation: 1,
            deleting: false,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the referenced database cluster.
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn instances(mut self, instances: i32) -> Self {
        self.instances = instances;
        self
    }

    /// Set the user-supplied partial pod template.
    pub fn template(mut self, template: PodTemplateSpec) -> Self {
        self.template = Some(template);
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Hand pod template ownership to the user.
    pub fn pod_spec_reconciliation_disabled(self) -> Self {
        self.annotation(RECONCILE_POD_SPEC_ANNOTATION, "disabled")
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    /// Mark the pooler as being deleted.
    pub fn deleting(mut self) -> Self {
        self.deleting = true;
        self
    }

    pub fn build(self) -> Pooler {
        Pooler {
            metadata: metadata(
                self.name,
                self.namespace,
                self.annotations,
                self.generation,
                self.deleting,
            ),
            spec: PoolerSpec {
                cluster: ClusterReference { name: self.cluster },
                instances: self.instances,
                template: self.template,
                deployment_strategy: None,
            },
            status: None,
        }
    }
}

impl Default for PoolerBuilder {
    fn default() -> Self {
        Self::new("pooler-rw")
    }
}

/// Builder for creating PgAdmin test fixtures.
#[derive(Clone, Debug)]
pub struct PgAdminBuilder {
    name: String,
    namespace: String,
    replicas: i32,
    image: Option<String>,
    template: Option<PodTemplateSpec>,
    generation: i64,
}

impl PgAdminBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            replicas: 1,
            image: None,
            template: None,
            generation: 1,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Override the pgAdmin image through the spec.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn template(mut self, template: PodTemplateSpec) -> Self {
        self.template = Some(template);
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn build(self) -> PgAdmin {
        PgAdmin {
            metadata: metadata(
                self.name,
                self.namespace,
                BTreeMap::new(),
                self.generation,
                false,
            ),
            spec: PgAdminSpec {
                replicas: self.replicas,
                image: self.image,
                template: self.template,
                ..Default::default()
            },
            status: None,
        }
    }
}

impl Default for PgAdminBuilder {
    fn default() -> Self {
        Self::new("console")
    }
}

/// A partial pod template holding the given containers.
pub fn template_with_containers(containers: Vec<Container>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers,
            ..Default::default()
        }),
    }
}

/// A container with only a name and optionally an image.
pub fn container(name: &str, image: Option<&str>) -> Container {
    Container {
        name: name.to_string(),
        image: image.map(str::to_string),
        ..Default::default()
    }
}
