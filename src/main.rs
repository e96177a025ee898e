//! pg-companion-operator - renders and reconciles PgBouncer and pgAdmin workloads.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the operator configuration from the environment
//! - Runs leader election (required for HA deployments)
//! - Starts the controllers and the health server

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use pg_companion_operator::{OperatorConfig, Shutdown};
use pg_companion_operator::health::{HealthState, run_health_server};
use pg_companion_operator::leader_election::LeaderElector;
use pg_companion_operator::run_controller;

/// Lease configuration
const LEASE_NAME: &str = "pg-companion-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// How long in-flight reconciliations may finish after a shutdown signal
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;
/// How long aborted reconciliations get to unwind
const ABORT_GRACE_PERIOD_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pg_companion_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting pg-companion-operator");

    let config = OperatorConfig::from_env()?;
    info!(
        operator_image = %config.operator_image,
        pgbouncer_image = %config.pgbouncer_image,
        pgadmin_image = %config.pgadmin_image,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Get pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());
    let is_leader = Arc::new(AtomicBool::new(false));
    let shutdown = Shutdown::new();

    // Health endpoints answer even while this replica is not the leader
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let elector = LeaderElector::new(
        client.clone(),
        &namespace,
        LEASE_NAME,
        &pod_name,
        Duration::from_secs(LEASE_TTL_SECS),
    );
    elector
        .acquire(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS))
        .await;
    is_leader.store(true, Ordering::SeqCst);

    #[allow(clippy::exit)]
    let lease_renewal_handle = {
        let is_leader = is_leader.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match elector.try_acquire_or_renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!("Lost leadership! Shutting down...");
                        is_leader.store(false, Ordering::SeqCst);
                        // Exit so Kubernetes restarts us and we re-enter election
                        std::process::exit(1);
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        is_leader.store(false, Ordering::SeqCst);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let mut controller_handle = {
        let health_state = health_state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_controller(client, config, Some(health_state), shutdown).await;
        })
    };

    tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal only exits via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false);
            shutdown.drain.cancel();

            let grace = Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS);
            if tokio::time::timeout(grace, &mut controller_handle).await.is_ok() {
                info!("Controllers drained");
            } else {
                warn!(
                    "Controllers still busy after {}s, aborting in-flight reconciliations",
                    SHUTDOWN_GRACE_PERIOD_SECS
                );
                shutdown.abort.cancel();
                let grace = Duration::from_secs(ABORT_GRACE_PERIOD_SECS);
                if tokio::time::timeout(grace, &mut controller_handle).await.is_err() {
                    warn!("Controllers did not stop, shutting down anyway");
                }
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal: without them the operator cannot
/// shut down gracefully.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
