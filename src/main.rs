use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use managed_db_operator::health::{HealthState, run_health_server};
use managed_db_operator::{Context, OperatorConfig};

/// Lease configuration
const LEASE_NAME: &str = "managed-db-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Health and metrics listen address
const HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("managed_db_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting managed-db-operator");

    let config = OperatorConfig::from_env()?;
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        governing_service = %config.governing_service,
        database_image = %config.database_image,
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
    let shutdown = CancellationToken::new();

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, HEALTH_ADDR).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = || LeaseLockParams {
        holder_id: pod_name.clone(),
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };
    let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());

    // Acquire leadership before starting the controllers
    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                is_leader.store(true, Ordering::SeqCst);
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)) => {}
            _ = shutdown_signal() => {
                info!("Received shutdown signal before acquiring leadership");
                return Ok(());
            }
        }
    }

    let lease_renewal_handle = {
        let is_leader = is_leader.clone();
        let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lease_lock.try_acquire_or_renew().await {
                    Ok(result) if result.acquired_lease => {}
                    Ok(_) => {
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

    info!(
        "Watching ManagedDatabase and DormantDatabase resources (apiVersion: managed-db-operator.smoketurner.com/v1alpha1)"
    );

    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        Some(health_state.clone()),
        shutdown.clone(),
    ));
    let mut controller_handle = tokio::spawn(managed_db_operator::run(client, ctx));

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
        // Lease renewal task only exits via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            // Aborts readiness and restore waits, then drains the controllers
            shutdown.cancel();

            info!(
                "Waiting up to {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            if tokio::time::timeout(
                Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
                &mut controller_handle,
            )
            .await
            .is_err()
            {
                warn!("Controllers did not stop within the grace period");
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
