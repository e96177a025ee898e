//! Operator baseline for each managed component.
//!
//! A [`DefaultPolicy`] is plain data. It describes what the operator wants in
//! the pod template and which parts it insists on (`force`). It becomes merge
//! operations on a [`PodTemplateBuilder`] through [`DefaultPolicy::apply`].

use k8s_openapi::api::core::v1::{
    Capabilities, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, PodSecurityContext,
    Probe, SeccompProfile, SecretVolumeSource, SecurityContext, TCPSocketAction, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::config::{OperatorConfig, PodIdentity};
use crate::crd::{PgAdmin, Pooler};
use crate::podspec::PodTemplateBuilder;

/// Name of the bootstrap init container that installs the controller binary.
pub const BOOTSTRAP_CONTAINER: &str = "bootstrap-controller";

const PGBOUNCER_CONTAINER: &str = "pgbouncer";
const PGBOUNCER_PORT: i32 = 6432;
const PGBOUNCER_METRICS_PORT: i32 = 9127;
const POSTGRES_PORT: i32 = 5432;
const SCRATCH_DATA_DIRECTORY: &str = "/controller";

const PGADMIN_CONTAINER: &str = "pgadmin";
const PGADMIN_PORT: i32 = 8080;
const PGADMIN_DATA_DIRECTORY: &str = "/var/lib/pgadmin";

/// A default value and whether it overrides the user's.
#[derive(Clone, Debug, PartialEq)]
pub struct Enforced<T> {
    pub value: T,
    pub force: bool,
}

impl<T> Enforced<T> {
    /// Operator value always wins.
    pub fn forced(value: T) -> Self {
        Self { value, force: true }
    }

    /// Operator value only fills gaps.
    pub fn preferred(value: T) -> Self {
        Self {
            value,
            force: false,
        }
    }
}

/// Init container the operator fully controls.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapContainer {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub security_context: Option<SecurityContext>,
}

/// Service port exposed for the component.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub port: i32,
    pub target_port: IntOrString,
}

/// Operator baseline for one component.
#[derive(Clone, Debug, PartialEq)]
pub struct DefaultPolicy {
    /// Name of the main container.
    pub container: String,
    pub image: Enforced<String>,
    pub command: Option<Enforced<Vec<String>>>,
    pub ports: Vec<ContainerPort>,
    pub env: Vec<Enforced<EnvVar>>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<Enforced<VolumeMount>>,
    pub pod_security_context: Option<Enforced<PodSecurityContext>>,
    pub security_context: Option<Enforced<SecurityContext>>,
    pub readiness_probe: Option<Probe>,
    pub service_account: Option<Enforced<String>>,
    pub bootstrap: Option<BootstrapContainer>,
    pub endpoint: Endpoint,
}

impl DefaultPolicy {
    /// Minimal policy: one container with a preferred image behind one port.
    pub fn new(container: impl Into<String>, image: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            container: container.into(),
            image: Enforced::preferred(image.into()),
            command: None,
            ports: Vec::new(),
            env: Vec::new(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            pod_security_context: None,
            security_context: None,
            readiness_probe: None,
            service_account: None,
            bootstrap: None,
            endpoint,
        }
    }

    /// Layer this policy onto a builder.
    pub fn apply(&self, builder: PodTemplateBuilder) -> PodTemplateBuilder {
        let main = self.container.as_str();
        let mut builder = builder.with_container_image(main, self.image.value.clone(), self.image.force);

        if let Some(command) = &self.command {
            builder = builder.with_container_command(main, command.value.clone(), command.force);
        }
        for port in &self.ports {
            builder = builder.with_container_port(main, port.clone());
        }
        for env in &self.env {
            builder = builder.with_container_env(main, env.value.clone(), env.force);
        }
        for volume in &self.volumes {
            builder = builder.with_volume(volume.clone());
        }
        for mount in &self.volume_mounts {
            builder = builder.with_container_volume_mount(main, mount.value.clone(), mount.force);
        }
        if let Some(context) = &self.security_context {
            builder =
                builder.with_container_security_context(main, context.value.clone(), context.force);
        }
        if let Some(probe) = &self.readiness_probe {
            builder = builder.with_readiness_probe(main, probe.clone(), false);
        }
        if let Some(context) = &self.pod_security_context {
            builder = builder.with_pod_security_context(context.value.clone(), context.force);
        }
        if let Some(account) = &self.service_account {
            builder = builder.with_service_account_name(account.value.clone(), account.force);
        }
        if let Some(bootstrap) = &self.bootstrap {
            let init = bootstrap.name.as_str();
            builder = builder
                .with_init_container_image(init, bootstrap.image.clone(), true)
                .with_init_container_command(init, bootstrap.command.clone(), true);
            for mount in &bootstrap.volume_mounts {
                builder = builder.with_init_container_volume_mount(init, mount.clone(), true);
            }
            if let Some(context) = &bootstrap.security_context {
                builder = builder.with_init_container_security_context(init, context.clone(), true);
            }
        }
        builder
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn port(name: &str, number: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: number,
        ..Default::default()
    }
}

fn runtime_default_seccomp() -> Option<SeccompProfile> {
    Some(SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        ..Default::default()
    })
}

fn restricted_pod_security_context(identity: PodIdentity) -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(identity.run_as_user),
        run_as_group: Some(identity.run_as_group),
        fs_group: Some(identity.run_as_group),
        seccomp_profile: runtime_default_seccomp(),
        ..Default::default()
    }
}

fn restricted_container_security_context(read_only_root: bool) -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        read_only_root_filesystem: Some(read_only_root),
        run_as_non_root: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: runtime_default_seccomp(),
        ..Default::default()
    }
}

fn scratch_mount() -> VolumeMount {
    VolumeMount {
        name: "scratch-data".to_string(),
        mount_path: SCRATCH_DATA_DIRECTORY.to_string(),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret_name: String) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Baseline for a PgBouncer pooler.
pub fn pgbouncer_policy(pooler: &Pooler, config: &OperatorConfig) -> DefaultPolicy {
    let cluster = &pooler.spec.cluster;
    DefaultPolicy {
        command: Some(Enforced::preferred(vec![
            "/controller/manager".to_string(),
            "pgbouncer".to_string(),
            "run".to_string(),
        ])),
        ports: vec![
            port("pgbouncer", PGBOUNCER_PORT),
            port("metrics", PGBOUNCER_METRICS_PORT),
        ],
        env: vec![
            Enforced::forced(env("NAMESPACE", pooler.namespace().unwrap_or_default())),
            Enforced::forced(env("POOLER_NAME", pooler.name_any())),
            Enforced::preferred(env("PGUSER", "pgbouncer")),
            Enforced::preferred(env("PGDATABASE", "pgbouncer")),
            Enforced::preferred(env("PGHOST", "/controller/run")),
            Enforced::preferred(env("PSQL_HISTORY", "/controller/tmp/.psql_history")),
        ],
        volumes: vec![
            secret_volume("ca", cluster.server_ca_secret_name()),
            secret_volume("server-tls", cluster.server_tls_secret_name()),
            Volume {
                name: "scratch-data".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        ],
        volume_mounts: vec![Enforced::forced(scratch_mount())],
        pod_security_context: Some(Enforced::forced(restricted_pod_security_context(
            config.pod_identity,
        ))),
        security_context: Some(Enforced::forced(restricted_container_security_context(true))),
        readiness_probe: Some(Probe {
            timeout_seconds: Some(config.probe_timeout_seconds),
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(PGBOUNCER_PORT),
                ..Default::default()
            }),
            ..Default::default()
        }),
        service_account: Some(Enforced::forced(pooler.name_any())),
        bootstrap: Some(BootstrapContainer {
            name: BOOTSTRAP_CONTAINER.to_string(),
            image: config.operator_image.clone(),
            command: vec![
                "/manager".to_string(),
                "bootstrap".to_string(),
                "/controller/manager".to_string(),
            ],
            volume_mounts: vec![scratch_mount()],
            security_context: Some(restricted_container_security_context(true)),
        }),
        ..DefaultPolicy::new(
            PGBOUNCER_CONTAINER,
            config.pgbouncer_image.clone(),
            Endpoint {
                name: "pgbouncer".to_string(),
                port: POSTGRES_PORT,
                target_port: IntOrString::String("pgbouncer".to_string()),
            },
        )
    }
}

/// Baseline for a pgAdmin console.
pub fn pgadmin_policy(pgadmin: &PgAdmin, config: &OperatorConfig) -> DefaultPolicy {
    let image = pgadmin
        .spec
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| config.pgadmin_image.clone());

    DefaultPolicy {
        ports: vec![port("http", PGADMIN_PORT)],
        env: vec![
            Enforced::preferred(env("PGADMIN_DEFAULT_EMAIL", pgadmin.spec.default_email.clone())),
            Enforced::preferred(env(
                "PGADMIN_DEFAULT_PASSWORD",
                pgadmin.spec.default_password.clone(),
            )),
            Enforced::preferred(env("PGADMIN_LISTEN_PORT", PGADMIN_PORT.to_string())),
        ],
        volumes: vec![Volume {
            name: "pgadmin-data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }],
        volume_mounts: vec![Enforced::preferred(VolumeMount {
            name: "pgadmin-data".to_string(),
            mount_path: PGADMIN_DATA_DIRECTORY.to_string(),
            ..Default::default()
        })],
        pod_security_context: Some(Enforced::preferred(restricted_pod_security_context(
            config.pod_identity,
        ))),
        security_context: Some(Enforced::preferred(restricted_container_security_context(
            false,
        ))),
        readiness_probe: Some(Probe {
            timeout_seconds: Some(config.probe_timeout_seconds),
            http_get: Some(HTTPGetAction {
                path: Some("/misc/ping".to_string()),
                port: IntOrString::Int(PGADMIN_PORT),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..DefaultPolicy::new(
            PGADMIN_CONTAINER,
            image,
            Endpoint {
                name: "http".to_string(),
                port: 80,
                target_port: IntOrString::String("http".to_string()),
            },
        )
    }
}
