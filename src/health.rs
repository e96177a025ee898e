//! Operator HTTP endpoints: `/healthz`, `/readyz` and `/metrics`.
//!
//! The server runs on every replica. Only the leader reports ready, so a
//! standby stays out of the Service while still answering liveness checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::{Metric, Registry};
use tracing::{error, info};

/// Port the endpoints listen on.
pub const HEALTH_PORT: u16 = 8080;

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Identifies one `Pooler` or `PgAdmin`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ParentLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ParentLabels {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Child kind and what the pass did to it (`created`, `updated`, `unchanged`).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChildLabels {
    pub kind: String,
    pub action: String,
}

/// Metric families exported under the `pg_companion` prefix.
pub struct Metrics {
    pub reconciliations: Family<ParentLabels, Counter>,
    pub reconciliation_errors: Family<ParentLabels, Counter>,
    pub reconcile_duration_seconds: Family<ParentLabels, Histogram>,
    pub child_writes: Family<ChildLabels, Counter>,
    pub instances_desired: Family<ParentLabels, Gauge>,
    pub instances_ready: Family<ParentLabels, Gauge>,
    registry: Registry,
}

/// Register `metric` and hand back a handle to it.
fn registered<M: Metric + Clone>(
    registry: &mut Registry,
    name: &str,
    help: &str,
    metric: M,
) -> M {
    registry.register(name, help, metric.clone());
    metric
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("pg_companion");
        let r = &mut registry;

        let reconciliations: Family<ParentLabels, Counter> = Family::default();
        let reconciliation_errors: Family<ParentLabels, Counter> = Family::default();
        let reconcile_duration_seconds: Family<ParentLabels, Histogram> =
            Family::new_with_constructor(|| Histogram::new(exponential_buckets(0.001, 2.0, 15)));
        let child_writes: Family<ChildLabels, Counter> = Family::default();
        let instances_desired: Family<ParentLabels, Gauge> = Family::default();
        let instances_ready: Family<ParentLabels, Gauge> = Family::default();

        let reconciliations =
            registered(r, "reconciliations", "Completed reconcile passes", reconciliations);
        let reconciliation_errors = registered(
            r,
            "reconciliation_errors",
            "Reconcile passes that returned an error",
            reconciliation_errors,
        );
        let reconcile_duration_seconds = registered(
            r,
            "reconcile_duration_seconds",
            "Wall time of a reconcile pass",
            reconcile_duration_seconds,
        );
        let child_writes = registered(r, "child_writes", "Child sync outcomes", child_writes);
        let instances_desired = registered(
            r,
            "instances_desired",
            "Replicas requested by the parent",
            instances_desired,
        );
        let instances_ready = registered(
            r,
            "instances_ready",
            "Replicas the Deployment reports ready",
            instances_ready,
        );

        Self {
            reconciliations,
            reconciliation_errors,
            reconcile_duration_seconds,
            child_writes,
            instances_desired,
            instances_ready,
            registry,
        }
    }
}

impl Metrics {
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ParentLabels::new(kind, namespace, name);
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        self.reconciliation_errors
            .get_or_create(&ParentLabels::new(kind, namespace, name))
            .inc();
    }

    pub fn record_child_write(&self, kind: &str, action: &str) {
        self.child_writes
            .get_or_create(&ChildLabels {
                kind: kind.to_string(),
                action: action.to_string(),
            })
            .inc();
    }

    pub fn set_instances(&self, kind: &str, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = ParentLabels::new(kind, namespace, name);
        self.instances_desired.get_or_create(&labels).set(desired);
        self.instances_ready.get_or_create(&labels).set(ready);
    }

    /// OpenMetrics text exposition of every family.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

/// State shared between the controllers and the HTTP endpoints.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
    /// Unix seconds of the last successful pass; zero before the first one.
    pub last_reconcile: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_reconciled(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                String::new(),
            )
        }
    }
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the endpoints on all interfaces until the listener fails.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", HEALTH_PORT)).await?;
    info!(port = HEALTH_PORT, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
