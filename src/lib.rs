pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    BackoffConfig, CONTROLLER_NAME, Context, DORMANT_FINALIZER, Error, FINALIZER, Result,
    dormant_error_policy, error_policy, reconcile, reconcile_dormant,
};
pub use crd::{DormantDatabase, ManagedDatabase, Snapshot};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Whether a controller stream error only says the object is gone
fn is_not_found<E: std::fmt::Debug>(e: &kube::runtime::controller::Error<Error, E>) -> bool {
    matches!(
        e,
        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
    )
}

/// Run the ManagedDatabase controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
pub async fn run_controller_scoped(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for ManagedDatabase resources (scope: {})",
        scope_msg
    );

    let databases: Api<ManagedDatabase> = scoped_api(client, namespace);

    // Use any_semantic() for more reliable resource discovery in test environments
    let watcher_config = WatcherConfig::default().any_semantic();

    // Sub-resources carry no owner references, so only the database itself is watched
    Controller::new(databases, watcher_config)
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) if is_not_found(&e) => {
                    // Expected after deletion when a queued key outlives its object
                    tracing::debug!("Object no longer exists: {:?}", e);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    tracing::info!("ManagedDatabase controller stopped");
}

/// Run the DormantDatabase controller with optional namespace scoping.
pub async fn run_dormant_controller_scoped(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for DormantDatabase resources (scope: {})",
        scope_msg
    );

    let dormants: Api<DormantDatabase> = scoped_api(client, namespace);
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(dormants, watcher_config)
        .graceful_shutdown_on(ctx.shutdown.clone().cancelled_owned())
        .run(reconcile_dormant, dormant_error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled dormant database: {}", obj.name);
                }
                Err(e) if is_not_found(&e) => {
                    tracing::debug!("Dormant object no longer exists: {:?}", e);
                }
                Err(e) => {
                    tracing::error!("Dormant reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    tracing::info!("DormantDatabase controller stopped");
}

/// Run both controllers until shutdown, sharing one context.
///
/// Marks the operator ready once the controllers are started.
pub async fn run(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.watch_namespace.clone();

    if let Some(health) = &ctx.health {
        health.set_ready(true).await;
    }

    tokio::join!(
        run_controller_scoped(client.clone(), ctx.clone(), namespace.as_deref()),
        run_dormant_controller_scoped(client, ctx.clone(), namespace.as_deref()),
    );
}
