//! Operator-wide configuration.
//!
//! Values are read once at startup from the environment and then handed to the
//! controller [`Context`](crate::controller::context::Context) explicitly, so
//! several independently configured instances can coexist (in tests, for
//! example).

use std::time::Duration;

use thiserror::Error;

/// Image of the operator itself, used for the bootstrap init container.
pub const DEFAULT_OPERATOR_IMAGE: &str = "ghcr.io/cloudnative-pg/cloudnative-pg:1.25.0";
/// PgBouncer image used when the pooler template does not pin one.
pub const DEFAULT_PGBOUNCER_IMAGE: &str = "ghcr.io/cloudnative-pg/pgbouncer:1.24.0";
/// pgAdmin image used when neither the spec nor the template pins one.
pub const DEFAULT_PGADMIN_IMAGE: &str = "ghcr.io/haneeshpld/pgadmin4-nonroot:latest";
/// Default UID for managed pods.
pub const DEFAULT_RUN_AS_USER: i64 = 998;
/// Default GID for managed pods.
pub const DEFAULT_RUN_AS_GROUP: i64 = 996;
/// Default readiness probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: i32 = 5;
/// Default upper bound on a single reconcile pass.
pub const DEFAULT_RECONCILE_TIMEOUT_SECONDS: u64 = 30;

/// Error raised when an environment variable holds an unusable value.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid value {value:?} for {variable}: {reason}")]
pub struct ConfigError {
    pub variable: String,
    pub value: String,
    pub reason: String,
}

/// UID/GID pair applied to managed pods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PodIdentity {
    pub run_as_user: i64,
    pub run_as_group: i64,
}

impl Default for PodIdentity {
    fn default() -> Self {
        Self {
            run_as_user: DEFAULT_RUN_AS_USER,
            run_as_group: DEFAULT_RUN_AS_GROUP,
        }
    }
}

/// Configuration consumed by the resource generators and the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Operator image identity; part of every workload fingerprint.
    pub operator_image: String,
    /// Default PgBouncer image.
    pub pgbouncer_image: String,
    /// Default pgAdmin image.
    pub pgadmin_image: String,
    /// Default pod security identity.
    pub pod_identity: PodIdentity,
    /// Readiness probe timeout in seconds.
    pub probe_timeout_seconds: i32,
    /// Deadline applied to each reconcile pass.
    pub reconcile_timeout: Duration,
    /// Restrict watches to one namespace (cluster-wide when `None`).
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_image: DEFAULT_OPERATOR_IMAGE.to_string(),
            pgbouncer_image: DEFAULT_PGBOUNCER_IMAGE.to_string(),
            pgadmin_image: DEFAULT_PGADMIN_IMAGE.to_string(),
            pod_identity: PodIdentity::default(),
            probe_timeout_seconds: DEFAULT_PROBE_TIMEOUT_SECONDS,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECONDS),
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Unset or empty variables fall back to the compiled-in defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let run_as_user = match get("DEFAULT_RUN_AS_USER") {
            Some(v) => parse_positive::<i64>("DEFAULT_RUN_AS_USER", &v)?,
            None => defaults.pod_identity.run_as_user,
        };
        let run_as_group = match get("DEFAULT_RUN_AS_GROUP") {
            Some(v) => parse_positive::<i64>("DEFAULT_RUN_AS_GROUP", &v)?,
            None => defaults.pod_identity.run_as_group,
        };
        let probe_timeout_seconds = match get("PROBE_TIMEOUT_SECONDS") {
            Some(v) => parse_positive("PROBE_TIMEOUT_SECONDS", &v)?,
            None => defaults.probe_timeout_seconds,
        };
        let reconcile_timeout = match get("RECONCILE_TIMEOUT_SECONDS") {
            Some(v) => Duration::from_secs(
                parse_positive::<u64>("RECONCILE_TIMEOUT_SECONDS", &v)?,
            ),
            None => defaults.reconcile_timeout,
        };

        Ok(Self {
            operator_image: get("OPERATOR_IMAGE_NAME").unwrap_or(defaults.operator_image),
            pgbouncer_image: get("PGBOUNCER_IMAGE_NAME").unwrap_or(defaults.pgbouncer_image),
            pgadmin_image: get("PGADMIN_IMAGE_NAME").unwrap_or(defaults.pgadmin_image),
            pod_identity: PodIdentity {
                run_as_user,
                run_as_group,
            },
            probe_timeout_seconds,
            reconcile_timeout,
            watch_namespace: get("WATCH_NAMESPACE"),
        })
    }
}

fn parse_positive<T>(variable: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = value.trim().parse().map_err(|e: T::Err| ConfigError {
        variable: variable.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if parsed <= T::default() {
        return Err(ConfigError {
            variable: variable.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}
