use std::collections::HashMap;
use std::sync::Arc;

use kube::Client;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::controller::events::{EventSink, KubeEventSink};
use crate::controller::gateway::{
    BackupScheduler, DatabaseStore, Infrastructure, MonitorGateway, RestoreBackend, Validator,
};
use crate::controller::validation::SpecValidator;
use crate::crd::ManagedDatabaseSpec;
use crate::health::HealthState;
use crate::resources::backup_schedule::CronJobBackupScheduler;
use crate::resources::infrastructure::KubeInfrastructure;
use crate::resources::monitor::ServiceMonitorGateway;
use crate::resources::restore::JobRestoreBackend;
use crate::resources::store::KubeStore;

/// Controller name used as field manager and event reporter
pub const CONTROLLER_NAME: &str = "managed-db-operator";

/// The collaborators a reconciliation talks to
#[derive(Clone)]
pub struct Gateways {
    pub store: Arc<dyn DatabaseStore>,
    pub infrastructure: Arc<dyn Infrastructure>,
    pub restore: Arc<dyn RestoreBackend>,
    pub validator: Arc<dyn Validator>,
    pub monitor: Arc<dyn MonitorGateway>,
    pub backup: Arc<dyn BackupScheduler>,
    pub events: Arc<dyn EventSink>,
}

/// Shared context for the controllers
pub struct Context {
    pub store: Arc<dyn DatabaseStore>,
    pub infrastructure: Arc<dyn Infrastructure>,
    pub restore: Arc<dyn RestoreBackend>,
    pub validator: Arc<dyn Validator>,
    pub monitor: Arc<dyn MonitorGateway>,
    pub backup: Arc<dyn BackupScheduler>,
    pub events: Arc<dyn EventSink>,
    pub config: OperatorConfig,
    /// Metrics sink, absent in tests
    pub health: Option<Arc<HealthState>>,
    /// Cancelled on shutdown; aborts bounded waits
    pub shutdown: CancellationToken,
    /// Last spec applied per `namespace/name`, used as the "old" side of updates
    applied_specs: RwLock<HashMap<String, ManagedDatabaseSpec>>,
}

impl Context {
    /// Wire the kube-backed implementations of every collaborator
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health: Option<Arc<HealthState>>,
        shutdown: CancellationToken,
    ) -> Self {
        let gateways = Gateways {
            store: Arc::new(KubeStore::new(client.clone())),
            infrastructure: Arc::new(KubeInfrastructure::new(client.clone(), config.clone())),
            restore: Arc::new(JobRestoreBackend::new(client.clone(), config.restore_image.clone())),
            validator: Arc::new(SpecValidator),
            monitor: Arc::new(ServiceMonitorGateway::new(client.clone())),
            backup: Arc::new(CronJobBackupScheduler::new(
                client.clone(),
                config.backup_image.clone(),
            )),
            events: Arc::new(KubeEventSink::new(client, CONTROLLER_NAME)),
        };
        Self::with_gateways(gateways, config, health, shutdown)
    }

    pub fn with_gateways(
        gateways: Gateways,
        config: OperatorConfig,
        health: Option<Arc<HealthState>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store: gateways.store,
            infrastructure: gateways.infrastructure,
            restore: gateways.restore,
            validator: gateways.validator,
            monitor: gateways.monitor,
            backup: gateways.backup,
            events: gateways.events,
            config,
            health,
            shutdown,
            applied_specs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn applied_spec(&self, namespace: &str, name: &str) -> Option<ManagedDatabaseSpec> {
        self.applied_specs
            .read()
            .await
            .get(&cache_key(namespace, name))
            .cloned()
    }

    pub async fn remember_spec(&self, namespace: &str, name: &str, spec: &ManagedDatabaseSpec) {
        self.applied_specs
            .write()
            .await
            .insert(cache_key(namespace, name), spec.clone());
    }

    pub async fn forget_spec(&self, namespace: &str, name: &str) {
        self.applied_specs
            .write()
            .await
            .remove(&cache_key(namespace, name));
    }
}

fn cache_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
