// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for pg-companion-operator.
//!
//! Uses proptest to generate random parents and templates and verify the
//! invariants of rendering and fingerprinting.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use proptest::prelude::*;
use serde_json::json;

use pg_companion_operator::OperatorConfig;
use pg_companion_operator::controller::component::ManagedComponent;
use pg_companion_operator::crd::{ClusterReference, Pooler, PoolerSpec};
use pg_companion_operator::podspec::PodTemplateBuilder;
use pg_companion_operator::resources::defaults::{DefaultPolicy, Endpoint};
use pg_companion_operator::resources::{SpecFingerprint, build_children, fingerprint};

/// Strategy for DNS-label-like names.
fn name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}"
}

/// Strategy for valid instance counts.
fn instances() -> impl Strategy<Value = i32> {
    0..=20i32
}

/// Env vars the pooler defaults only prefer.
fn preferred_env_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("PGUSER"),
        Just("PGDATABASE"),
        Just("PGHOST"),
        Just("PSQL_HISTORY"),
    ]
}

fn pooler(name: &str, cluster: &str, instances: i32, template: Option<PodTemplateSpec>) -> Pooler {
    Pooler {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: PoolerSpec {
            cluster: ClusterReference {
                name: cluster.to_string(),
            },
            instances,
            template,
            deployment_strategy: None,
        },
        status: None,
    }
}

fn pgbouncer_template(env: Vec<EnvVar>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "pgbouncer".to_string(),
                env: Some(env),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Strategy for image references.
fn image() -> impl Strategy<Value = String> {
    "[a-z]{1,10}/[a-z]{1,10}:[0-9]{1,2}\\.[0-9]{1,2}"
}

fn hash_of<K: kube::Resource>(object: &K) -> SpecFingerprint {
    SpecFingerprint::from_metadata(object.meta()).unwrap()
}

/// Children fingerprints of a pooler rendered with its own defaults.
fn child_hashes(parent: &Pooler) -> (SpecFingerprint, SpecFingerprint) {
    let config = OperatorConfig::default();
    let children = build_children(parent, &parent.default_policy(&config), &config).unwrap();
    (hash_of(&children.deployment), hash_of(&children.service))
}

fn pgbouncer_container(image: Option<&str>, env: Vec<EnvVar>, command: Vec<String>) -> Container {
    Container {
        name: "pgbouncer".to_string(),
        image: image.map(str::to_string),
        env: Some(env),
        command: (!command.is_empty()).then_some(command),
        ..Default::default()
    }
}

fn template_of(container: Container, volumes: Vec<Volume>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
        }),
    }
}

fn scratch_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn pool_policy(default_image: &str) -> DefaultPolicy {
    DefaultPolicy {
        ports: vec![ContainerPort {
            name: Some("pool".to_string()),
            container_port: 6432,
            ..Default::default()
        }],
        ..DefaultPolicy::new(
            "pool",
            default_image,
            Endpoint {
                name: "pool".to_string(),
                port: 80,
                target_port: IntOrString::Int(6432),
            },
        )
    }
}

proptest! {
    /// Property: rendering the same parent twice yields identical children.
    #[test]
    fn test_rendering_is_deterministic(
        name in name(),
        cluster in name(),
        instances in instances(),
    ) {
        let config = OperatorConfig::default();
        let parent = pooler(&name, &cluster, instances, None);
        let policy = parent.default_policy(&config);

        let first = build_children(&parent, &policy, &config).unwrap();
        let second = build_children(&parent, &policy, &config).unwrap();

        prop_assert_eq!(hash_of(&first.deployment), hash_of(&second.deployment));
        prop_assert_eq!(hash_of(&first.service), hash_of(&second.service));
        prop_assert_eq!(first, second);
    }

    /// Property: any replica change moves the Deployment fingerprint only.
    #[test]
    fn test_replica_change_moves_deployment_hash(
        cluster in name(),
        a in instances(),
        b in instances(),
    ) {
        prop_assume!(a != b);
        let config = OperatorConfig::default();
        let before = pooler("pool", &cluster, a, None);
        let after = pooler("pool", &cluster, b, None);

        let before = build_children(&before, &before.default_policy(&config), &config).unwrap();
        let after = build_children(&after, &after.default_policy(&config), &config).unwrap();

        prop_assert_ne!(hash_of(&before.deployment), hash_of(&after.deployment));
        prop_assert_eq!(hash_of(&before.service), hash_of(&after.service));
    }

    /// Property: the fingerprint ignores the order of volumes.
    #[test]
    fn test_fingerprint_ignores_volume_order(
        entries in prop::collection::btree_map(name(), name(), 1..8),
    ) {
        let items: Vec<_> = entries
            .iter()
            .map(|(k, v)| json!({ "name": k, "configMap": { "name": v } }))
            .collect();
        let mut reversed = items.clone();
        reversed.reverse();

        let a = fingerprint(&json!({ "volumes": items })).unwrap();
        let b = fingerprint(&json!({ "volumes": reversed })).unwrap();
        prop_assert_eq!(a.as_str().len(), 64);
        prop_assert_eq!(a, b);
    }

    /// Property: a user value for a preferred default survives, exactly once.
    #[test]
    fn test_user_env_overrides_survive(
        variable in preferred_env_name(),
        value in "[a-zA-Z0-9/_.]{1,30}",
    ) {
        let config = OperatorConfig::default();
        let parent = pooler(
            "pool",
            "db",
            1,
            Some(pgbouncer_template(vec![env(variable, &value)])),
        );
        let policy = parent.default_policy(&config);
        let template = policy
            .apply(PodTemplateBuilder::from_template(parent.spec.template.as_ref()))
            .build();

        let container = &template.spec.unwrap().containers[0];
        let matching: Vec<_> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .filter(|e| e.name == variable)
            .collect();
        prop_assert_eq!(matching.len(), 1);
        prop_assert_eq!(matching[0].value.as_deref(), Some(value.as_str()));
    }

    /// Property: operator-enforced env always wins over the user's value.
    #[test]
    fn test_forced_env_wins(value in "[a-z0-9-]{1,20}") {
        let config = OperatorConfig::default();
        let parent = pooler(
            "pool",
            "db",
            1,
            Some(pgbouncer_template(vec![env("POOLER_NAME", &value)])),
        );
        let template = parent
            .default_policy(&config)
            .apply(PodTemplateBuilder::from_template(parent.spec.template.as_ref()))
            .build();

        let container = &template.spec.unwrap().containers[0];
        let pooler_name: Vec<_> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .filter(|e| e.name == "POOLER_NAME")
            .collect();
        prop_assert_eq!(pooler_name.len(), 1);
        prop_assert_eq!(pooler_name[0].value.as_deref(), Some("pool"));
    }

    /// Property: merging the defaults into an already merged template changes nothing.
    #[test]
    fn test_merge_is_idempotent(
        variable in preferred_env_name(),
        value in name(),
        instances in instances(),
    ) {
        let config = OperatorConfig::default();
        let parent = pooler(
            "pool",
            "db",
            instances,
            Some(pgbouncer_template(vec![env(variable, &value)])),
        );
        let policy = parent.default_policy(&config);

        let once = policy
            .apply(PodTemplateBuilder::from_template(parent.spec.template.as_ref()))
            .build();
        let twice = policy
            .apply(PodTemplateBuilder::from_template(Some(&once)))
            .build();

        prop_assert_eq!(once, twice);
    }

    /// Property: changing the user's image moves the Deployment fingerprint only.
    #[test]
    fn test_image_change_moves_deployment_hash(a in image(), b in image()) {
        prop_assume!(a != b);
        let with_image = |image: &str| {
            let container = pgbouncer_container(Some(image), vec![], vec![]);
            pooler("pool", "db", 1, Some(template_of(container, vec![])))
        };
        let before = with_image(&a);
        let after = with_image(&b);

        let (before_deployment, before_service) = child_hashes(&before);
        let (after_deployment, after_service) = child_hashes(&after);
        prop_assert_ne!(before_deployment, after_deployment);
        prop_assert_eq!(before_service, after_service);
    }

    /// Property: changing an env value moves the Deployment fingerprint.
    #[test]
    fn test_env_value_change_moves_deployment_hash(
        variable in "[A-Z][A-Z_]{0,15}",
        a in "[a-z0-9]{1,12}",
        b in "[a-z0-9]{1,12}",
    ) {
        prop_assume!(a != b);
        let render = |value: &str| {
            let container = pgbouncer_container(None, vec![env(&variable, value)], vec![]);
            child_hashes(&pooler("pool", "db", 1, Some(template_of(container, vec![])))).0
        };
        prop_assert_ne!(render(&a), render(&b));
    }

    /// Property: changing the container command moves the Deployment fingerprint.
    #[test]
    fn test_command_change_moves_deployment_hash(
        a in prop::collection::vec("[a-z/-]{1,12}", 1..4),
        b in prop::collection::vec("[a-z/-]{1,12}", 1..4),
    ) {
        prop_assume!(a != b);
        let render = |command: Vec<String>| {
            let container = pgbouncer_container(None, vec![], command);
            child_hashes(&pooler("pool", "db", 1, Some(template_of(container, vec![])))).0
        };
        prop_assert_ne!(render(a), render(b));
    }

    /// Property: parents that differ only in volume order render to the same fingerprints.
    #[test]
    fn test_volume_order_does_not_change_hashes(
        names in prop::collection::btree_set(name(), 1..6),
        instances in instances(),
    ) {
        let volumes: Vec<Volume> = names.iter().map(|n| scratch_volume(n.as_str())).collect();
        let mut reversed = volumes.clone();
        reversed.reverse();

        let container = || pgbouncer_container(None, vec![env("PGUSER", "app")], vec![]);
        let a = pooler("pool", "db", instances, Some(template_of(container(), volumes)));
        let b = pooler("pool", "db", instances, Some(template_of(container(), reversed)));

        prop_assert_eq!(child_hashes(&a), child_hashes(&b));
    }

    /// Property: parents decoded from JSON with shuffled keys render identically.
    #[test]
    fn test_key_order_does_not_change_hashes(
        cluster in name(),
        instances in instances(),
        user in "[a-z]{1,10}",
    ) {
        let forward = json!({
            "apiVersion": "postgresql.cnpg.io/v1",
            "kind": "Pooler",
            "metadata": { "name": "pool", "namespace": "default", "uid": "uid-pool" },
            "spec": {
                "cluster": { "name": cluster },
                "instances": instances,
                "template": { "spec": { "containers": [
                    { "name": "pgbouncer", "env": [{ "name": "PGUSER", "value": user }] }
                ] } }
            }
        });
        let backward = json!({
            "spec": {
                "template": { "spec": { "containers": [
                    { "env": [{ "value": user, "name": "PGUSER" }], "name": "pgbouncer" }
                ] } },
                "instances": instances,
                "cluster": { "name": cluster }
            },
            "metadata": { "uid": "uid-pool", "namespace": "default", "name": "pool" },
            "kind": "Pooler",
            "apiVersion": "postgresql.cnpg.io/v1"
        });
        let a: Pooler = serde_json::from_value(forward).unwrap();
        let b: Pooler = serde_json::from_value(backward).unwrap();

        prop_assert_eq!(child_hashes(&a), child_hashes(&b));
    }

    /// Property: a user image for the `pool` container beats any policy default.
    #[test]
    fn test_user_image_beats_policy_default(user in image(), default in image()) {
        prop_assume!(user != default);
        let config = OperatorConfig::default();
        let container = Container {
            name: "pool".to_string(),
            image: Some(user.clone()),
            ..Default::default()
        };
        let parent = pooler("pool", "db", 1, Some(template_of(container, vec![])));

        let children = build_children(&parent, &pool_policy(&default), &config).unwrap();
        let containers = children.deployment.spec.unwrap().template.spec.unwrap().containers;
        prop_assert_eq!(containers.len(), 1);
        prop_assert_eq!(containers[0].image.as_deref(), Some(user.as_str()));

        let service = children.service.spec.unwrap();
        let port = &service.ports.unwrap()[0];
        prop_assert_eq!(port.port, 80);
        prop_assert_eq!(port.target_port.clone(), Some(IntOrString::Int(6432)));
    }
}
