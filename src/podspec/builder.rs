//! Pod template builder.
//!
//! The builder starts from the user's partial pod template and records the
//! operator's baseline as a list of [`MergeOp`]s. [`PodTemplateBuilder::build`]
//! folds those operations over a copy of the base template; neither the base
//! nor the recorded operations are ever mutated, so building twice yields the
//! same template.
//!
//! Two merge disciplines apply:
//!
//! - **Additive** (volumes, volume mounts, env vars, ports): an entry whose key
//!   already exists is left alone (the user's entry wins), otherwise the
//!   operator's entry is appended.
//! - **Fill if absent** (image, command, security context, probe, service
//!   account): the operator value is used only when the field is unset. With
//!   `force` the operator value always replaces the user's.
//!
//! Env vars and volume mounts also honour `force`, replacing a same-named entry
//! in place.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    SecurityContext, Volume, VolumeMount,
};

/// Which container list a target lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Container,
    InitContainer,
}

/// A container addressed by list and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerTarget {
    pub kind: ContainerKind,
    pub name: String,
}

impl ContainerTarget {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            kind: ContainerKind::Container,
            name: name.into(),
        }
    }

    pub fn init_container(name: impl Into<String>) -> Self {
        Self {
            kind: ContainerKind::InitContainer,
            name: name.into(),
        }
    }
}

/// A single merge step applied by the builder.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOp {
    /// Set a pod label. Operator labels always win: selectors depend on them.
    Label { key: String, value: String },
    /// Set a pod annotation.
    Annotation { key: String, value: String },
    /// Append a volume unless one with the same name exists.
    Volume(Volume),
    /// Merge the pod security context.
    PodSecurityContext {
        context: PodSecurityContext,
        force: bool,
    },
    /// Set the service account name.
    ServiceAccountName { name: String, force: bool },
    /// Set a container image.
    Image {
        target: ContainerTarget,
        image: String,
        force: bool,
    },
    /// Set a container command.
    Command {
        target: ContainerTarget,
        command: Vec<String>,
        force: bool,
    },
    /// Append a container port unless the name or number is taken.
    Port {
        target: ContainerTarget,
        port: ContainerPort,
    },
    /// Append (or with `force`, replace) an env var.
    Env {
        target: ContainerTarget,
        env: EnvVar,
        force: bool,
    },
    /// Append (or with `force`, replace) a volume mount.
    VolumeMount {
        target: ContainerTarget,
        mount: VolumeMount,
        force: bool,
    },
    /// Merge a container security context field by field.
    SecurityContext {
        target: ContainerTarget,
        context: SecurityContext,
        force: bool,
    },
    /// Set a readiness probe.
    ReadinessProbe {
        target: ContainerTarget,
        probe: Probe,
        force: bool,
    },
}

impl MergeOp {
    /// Apply this operation to a template, returning the merged template.
    pub fn apply(&self, mut template: PodTemplateSpec) -> PodTemplateSpec {
        match self {
            MergeOp::Label { key, value } => {
                template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .labels
                    .get_or_insert_with(Default::default)
                    .insert(key.clone(), value.clone());
            }
            MergeOp::Annotation { key, value } => {
                template
                    .metadata
                    .get_or_insert_with(Default::default)
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(key.clone(), value.clone());
            }
            MergeOp::Volume(volume) => {
                let spec = template.spec.get_or_insert_with(PodSpec::default);
                append_if_absent(&mut spec.volumes, volume, |a, b| a.name == b.name);
            }
            MergeOp::PodSecurityContext { context, force } => {
                let spec = template.spec.get_or_insert_with(PodSpec::default);
                spec.security_context = Some(match spec.security_context.take() {
                    Some(current) if !force => fill_pod_security_context(current, context),
                    _ => context.clone(),
                });
            }
            MergeOp::ServiceAccountName { name, force } => {
                let spec = template.spec.get_or_insert_with(PodSpec::default);
                if *force || is_blank(spec.service_account_name.as_deref()) {
                    spec.service_account_name = Some(name.clone());
                }
            }
            MergeOp::Image {
                target,
                image,
                force,
            } => update_container(&mut template, target, |c| {
                if *force || is_blank(c.image.as_deref()) {
                    c.image = Some(image.clone());
                }
            }),
            MergeOp::Command {
                target,
                command,
                force,
            } => update_container(&mut template, target, |c| {
                if *force || c.command.as_ref().is_none_or(Vec::is_empty) {
                    c.command = Some(command.clone());
                }
            }),
            MergeOp::Port { target, port } => update_container(&mut template, target, |c| {
                append_if_absent(&mut c.ports, port, same_port);
            }),
            MergeOp::Env { target, env, force } => update_container(&mut template, target, |c| {
                if *force {
                    upsert(&mut c.env, env, |a, b| a.name == b.name);
                } else {
                    append_if_absent(&mut c.env, env, |a, b| a.name == b.name);
                }
            }),
            MergeOp::VolumeMount {
                target,
                mount,
                force,
            } => update_container(&mut template, target, |c| {
                if *force {
                    upsert(&mut c.volume_mounts, mount, |a, b| a.name == b.name);
                } else {
                    append_if_absent(&mut c.volume_mounts, mount, |a, b| a.name == b.name);
                }
            }),
            MergeOp::SecurityContext {
                target,
                context,
                force,
            } => update_container(&mut template, target, |c| {
                c.security_context = Some(match c.security_context.take() {
                    Some(current) if !force => fill_security_context(current, context),
                    _ => context.clone(),
                });
            }),
            MergeOp::ReadinessProbe {
                target,
                probe,
                force,
            } => update_container(&mut template, target, |c| {
                if *force || c.readiness_probe.is_none() {
                    c.readiness_probe = Some(probe.clone());
                }
            }),
        }
        template
    }
}

/// Accumulates merge operations on top of a base pod template.
#[derive(Clone, Debug, Default)]
pub struct PodTemplateBuilder {
    base: PodTemplateSpec,
    ops: Vec<MergeOp>,
}

impl PodTemplateBuilder {
    /// Start from an empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the user's partial template, if any.
    pub fn from_template(template: Option<&PodTemplateSpec>) -> Self {
        Self {
            base: template.cloned().unwrap_or_default(),
            ops: Vec::new(),
        }
    }

    /// Record an arbitrary merge operation.
    pub fn with_op(mut self, op: MergeOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn with_label(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_op(MergeOp::Label {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn with_annotation(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_op(MergeOp::Annotation {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn with_volume(self, volume: Volume) -> Self {
        self.with_op(MergeOp::Volume(volume))
    }

    pub fn with_pod_security_context(self, context: PodSecurityContext, force: bool) -> Self {
        self.with_op(MergeOp::PodSecurityContext { context, force })
    }

    pub fn with_service_account_name(self, name: impl Into<String>, force: bool) -> Self {
        self.with_op(MergeOp::ServiceAccountName {
            name: name.into(),
            force,
        })
    }

    pub fn with_container_image(self, container: &str, image: impl Into<String>, force: bool) -> Self {
        self.with_op(MergeOp::Image {
            target: ContainerTarget::container(container),
            image: image.into(),
            force,
        })
    }

    pub fn with_init_container_image(
        self,
        container: &str,
        image: impl Into<String>,
        force: bool,
    ) -> Self {
        self.with_op(MergeOp::Image {
            target: ContainerTarget::init_container(container),
            image: image.into(),
            force,
        })
    }

    pub fn with_container_command(self, container: &str, command: Vec<String>, force: bool) -> Self {
        self.with_op(MergeOp::Command {
            target: ContainerTarget::container(container),
            command,
            force,
        })
    }

    pub fn with_init_container_command(
        self,
        container: &str,
        command: Vec<String>,
        force: bool,
    ) -> Self {
        self.with_op(MergeOp::Command {
            target: ContainerTarget::init_container(container),
            command,
            force,
        })
    }

    pub fn with_container_port(self, container: &str, port: ContainerPort) -> Self {
        self.with_op(MergeOp::Port {
            target: ContainerTarget::container(container),
            port,
        })
    }

    pub fn with_container_env(self, container: &str, env: EnvVar, force: bool) -> Self {
        self.with_op(MergeOp::Env {
            target: ContainerTarget::container(container),
            env,
            force,
        })
    }

    pub fn with_container_volume_mount(self, container: &str, mount: VolumeMount, force: bool) -> Self {
        self.with_op(MergeOp::VolumeMount {
            target: ContainerTarget::container(container),
            mount,
            force,
        })
    }

    pub fn with_init_container_volume_mount(
        self,
        container: &str,
        mount: VolumeMount,
        force: bool,
    ) -> Self {
        self.with_op(MergeOp::VolumeMount {
            target: ContainerTarget::init_container(container),
            mount,
            force,
        })
    }

    pub fn with_container_security_context(
        self,
        container: &str,
        context: SecurityContext,
        force: bool,
    ) -> Self {
        self.with_op(MergeOp::SecurityContext {
            target: ContainerTarget::container(container),
            context,
            force,
        })
    }

    pub fn with_init_container_security_context(
        self,
        container: &str,
        context: SecurityContext,
        force: bool,
    ) -> Self {
        self.with_op(MergeOp::SecurityContext {
            target: ContainerTarget::init_container(container),
            context,
            force,
        })
    }

    pub fn with_readiness_probe(self, container: &str, probe: Probe, force: bool) -> Self {
        self.with_op(MergeOp::ReadinessProbe {
            target: ContainerTarget::container(container),
            probe,
            force,
        })
    }

    /// The recorded operations, in application order.
    pub fn ops(&self) -> &[MergeOp] {
        &self.ops
    }

    /// Fold the recorded operations over the base template.
    pub fn build(&self) -> PodTemplateSpec {
        self.ops
            .iter()
            .fold(self.base.clone(), |template, op| op.apply(template))
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(str::is_empty)
}

/// Run `update` against the target container, creating it on first reference.
fn update_container(
    template: &mut PodTemplateSpec,
    target: &ContainerTarget,
    update: impl FnOnce(&mut Container),
) {
    let spec = template.spec.get_or_insert_with(PodSpec::default);
    let containers = match target.kind {
        ContainerKind::Container => &mut spec.containers,
        ContainerKind::InitContainer => spec.init_containers.get_or_insert_with(Vec::new),
    };

    if let Some(container) = containers.iter_mut().find(|c| c.name == target.name) {
        update(container);
        return;
    }

    let mut container = Container {
        name: target.name.clone(),
        ..Default::default()
    };
    update(&mut container);
    containers.push(container);
}

fn append_if_absent<T: Clone>(items: &mut Option<Vec<T>>, item: &T, same: impl Fn(&T, &T) -> bool) {
    let items = items.get_or_insert_with(Vec::new);
    if !items.iter().any(|existing| same(existing, item)) {
        items.push(item.clone());
    }
}

fn upsert<T: Clone>(items: &mut Option<Vec<T>>, item: &T, same: impl Fn(&T, &T) -> bool) {
    let items = items.get_or_insert_with(Vec::new);
    match items.iter_mut().find(|existing| same(existing, item)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

/// Ports collide on equal names or on equal number and protocol.
fn same_port(a: &ContainerPort, b: &ContainerPort) -> bool {
    let same_name = matches!((&a.name, &b.name), (Some(x), Some(y)) if x == y);
    let protocol = |p: &ContainerPort| p.protocol.clone().unwrap_or_else(|| "TCP".to_string());
    same_name || (a.container_port == b.container_port && protocol(a) == protocol(b))
}

macro_rules! fill_absent {
    ($target:ident, $source:ident, [$($field:ident),* $(,)?]) => {
        $(
            if $target.$field.is_none() {
                $target.$field = $source.$field.clone();
            }
        )*
    };
}

fn fill_security_context(mut current: SecurityContext, defaults: &SecurityContext) -> SecurityContext {
    fill_absent!(
        current,
        defaults,
        [
            allow_privilege_escalation,
            capabilities,
            privileged,
            proc_mount,
            read_only_root_filesystem,
            run_as_group,
            run_as_non_root,
            run_as_user,
            se_linux_options,
            seccomp_profile,
            windows_options,
        ]
    );
    current
}

fn fill_pod_security_context(
    mut current: PodSecurityContext,
    defaults: &PodSecurityContext,
) -> PodSecurityContext {
    fill_absent!(
        current,
        defaults,
        [
            fs_group,
            fs_group_change_policy,
            run_as_group,
            run_as_non_root,
            run_as_user,
            se_linux_options,
            seccomp_profile,
            supplemental_groups,
            sysctls,
            windows_options,
        ]
    );
    current
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, SecretVolumeSource};

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn user_template(containers: Vec<Container>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
        }
    }

    fn container<'a>(template: &'a PodTemplateSpec, name: &str) -> &'a Container {
        template
            .spec
            .as_ref()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_creates_container_on_first_reference() {
        let template = PodTemplateBuilder::new()
            .with_container_image("pool", "pgbouncer:1.24.0", false)
            .build();

        let spec = template.spec.unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].name, "pool");
        assert_eq!(spec.containers[0].image.as_deref(), Some("pgbouncer:1.24.0"));
        assert!(spec.init_containers.is_none());
    }

    #[test]
    fn test_init_container_goes_to_init_list() {
        let template = PodTemplateBuilder::new()
            .with_init_container_image("bootstrap-controller", "operator:1", true)
            .build();

        let spec = template.spec.unwrap();
        assert!(spec.containers.is_empty());
        let init = spec.init_containers.unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "bootstrap-controller");
    }

    #[test]
    fn test_user_image_wins_without_force() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            image: Some("custom/pgbouncer:dev".to_string()),
            ..Default::default()
        }]);

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_image("pool", "pgbouncer:1.24.0", false)
            .build();

        assert_eq!(
            container(&template, "pool").image.as_deref(),
            Some("custom/pgbouncer:dev")
        );
    }

    #[test]
    fn test_force_overrides_user_command() {
        let base = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                init_containers: Some(vec![Container {
                    name: "bootstrap-controller".to_string(),
                    command: Some(vec!["sh".to_string()]),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };
        let command = vec!["/manager".to_string(), "bootstrap".to_string()];

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_init_container_command("bootstrap-controller", command.clone(), true)
            .build();

        let init = template.spec.unwrap().init_containers.unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].command, Some(command));
    }

    #[test]
    fn test_empty_image_counts_as_unset() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            image: Some(String::new()),
            ..Default::default()
        }]);
        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_image("pool", "pgbouncer:1.24.0", false)
            .build();
        assert_eq!(
            container(&template, "pool").image.as_deref(),
            Some("pgbouncer:1.24.0")
        );
    }

    #[test]
    fn test_user_volume_wins_and_is_not_duplicated() {
        let user_volume = Volume {
            name: "v".to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let base = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                volumes: Some(vec![user_volume.clone()]),
                ..Default::default()
            }),
        };
        let operator_volume = Volume {
            name: "v".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some("operator-secret".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_volume(operator_volume)
            .build();

        let volumes = template.spec.unwrap().volumes.unwrap();
        assert_eq!(volumes, vec![user_volume]);
    }

    #[test]
    fn test_operator_env_appended_after_user_env() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            env: Some(vec![env("PGUSER", "custom")]),
            ..Default::default()
        }]);

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_env("pool", env("PGUSER", "pgbouncer"), false)
            .with_container_env("pool", env("PGDATABASE", "pgbouncer"), false)
            .build();

        let env = container(&template, "pool").env.clone().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].value.as_deref(), Some("custom"));
        assert_eq!(env[1].name, "PGDATABASE");
    }

    #[test]
    fn test_forced_env_replaces_in_place() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            env: Some(vec![env("NAMESPACE", "spoofed"), env("EXTRA", "1")]),
            ..Default::default()
        }]);

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_env("pool", env("NAMESPACE", "prod"), true)
            .build();

        let env = container(&template, "pool").env.clone().unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].name, "NAMESPACE");
        assert_eq!(env[0].value.as_deref(), Some("prod"));
    }

    #[test]
    fn test_ports_deduplicated_by_name_or_number() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            ports: Some(vec![ContainerPort {
                name: Some("custom".to_string()),
                container_port: 6432,
                ..Default::default()
            }]),
            ..Default::default()
        }]);

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_port(
                "pool",
                ContainerPort {
                    name: Some("pgbouncer".to_string()),
                    container_port: 6432,
                    ..Default::default()
                },
            )
            .with_container_port(
                "pool",
                ContainerPort {
                    name: Some("metrics".to_string()),
                    container_port: 9127,
                    ..Default::default()
                },
            )
            .build();

        let ports = container(&template, "pool").ports.clone().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name.as_deref(), Some("custom"));
        assert_eq!(ports[1].container_port, 9127);
    }

    #[test]
    fn test_security_context_filled_field_by_field() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            security_context: Some(SecurityContext {
                run_as_user: Some(4242),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let defaults = SecurityContext {
            run_as_user: Some(998),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        };

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_security_context("pool", defaults.clone(), false)
            .build();
        let merged = container(&template, "pool").security_context.clone().unwrap();
        assert_eq!(merged.run_as_user, Some(4242));
        assert_eq!(merged.run_as_non_root, Some(true));
        assert_eq!(merged.allow_privilege_escalation, Some(false));

        let forced = PodTemplateBuilder::from_template(Some(&base))
            .with_container_security_context("pool", defaults.clone(), true)
            .build();
        assert_eq!(
            container(&forced, "pool").security_context.clone(),
            Some(defaults)
        );
    }

    #[test]
    fn test_pod_security_context_and_service_account() {
        let base = PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                service_account_name: Some("user-sa".to_string()),
                security_context: Some(PodSecurityContext {
                    fs_group: Some(5000),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        };

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_service_account_name("operator-sa", false)
            .with_pod_security_context(
                PodSecurityContext {
                    fs_group: Some(996),
                    run_as_user: Some(998),
                    ..Default::default()
                },
                false,
            )
            .build();
        let spec = template.spec.unwrap();
        assert_eq!(spec.service_account_name.as_deref(), Some("user-sa"));
        let ctx = spec.security_context.unwrap();
        assert_eq!(ctx.fs_group, Some(5000));
        assert_eq!(ctx.run_as_user, Some(998));

        let forced = PodTemplateBuilder::from_template(Some(&base))
            .with_service_account_name("operator-sa", true)
            .build();
        assert_eq!(
            forced.spec.unwrap().service_account_name.as_deref(),
            Some("operator-sa")
        );
    }

    #[test]
    fn test_labels_always_set_by_operator() {
        let mut base = PodTemplateSpec::default();
        base.metadata = Some(Default::default());
        base.metadata
            .as_mut()
            .unwrap()
            .labels
            .get_or_insert_with(Default::default)
            .insert("app.kubernetes.io/instance".to_string(), "spoofed".to_string());

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_label("app.kubernetes.io/instance", "p1")
            .with_label("team", "data")
            .build();

        let labels = template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels.get("app.kubernetes.io/instance").unwrap(), "p1");
        assert_eq!(labels.get("team").unwrap(), "data");
    }

    #[test]
    fn test_user_containers_preserved_verbatim() {
        let sidecar = Container {
            name: "log-shipper".to_string(),
            image: Some("fluent-bit:3".to_string()),
            args: Some(vec!["--quiet".to_string()]),
            ..Default::default()
        };
        let base = user_template(vec![sidecar.clone()]);

        let template = PodTemplateBuilder::from_template(Some(&base))
            .with_container_image("pool", "pgbouncer:1.24.0", false)
            .with_container_env("pool", env("A", "1"), false)
            .build();

        let spec = template.spec.unwrap();
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[0], sidecar);
    }

    #[test]
    fn test_build_is_repeatable_and_leaves_base_untouched() {
        let base = user_template(vec![Container {
            name: "pool".to_string(),
            ..Default::default()
        }]);
        let builder = PodTemplateBuilder::from_template(Some(&base))
            .with_container_image("pool", "pgbouncer:1.24.0", false)
            .with_volume(Volume {
                name: "scratch-data".to_string(),
                ..Default::default()
            });

        let first = builder.build();
        let second = builder.build();
        assert_eq!(first, second);
        assert_eq!(builder.ops().len(), 2);
        assert!(container(&base, "pool").image.is_none());
    }
}
