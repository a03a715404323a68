use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ManagedDatabase is the Schema for the manageddatabases API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "managed-db-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "ManagedDatabase",
    plural = "manageddatabases",
    shortname = "mdb",
    namespaced,
    status = "ManagedDatabaseStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatabaseSpec {
    /// PostgreSQL image tag (e.g., "16.4")
    pub version: String,

    /// Number of workload pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Storage for the data volume. Without it the workload uses an emptyDir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Secret holding the admin password. Defaults to `<name>-admin-auth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret: Option<SecretRef>,

    /// One-shot bootstrap from a snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_schedule: Option<BackupScheduleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    /// Veto deletion: a deleted database is recreated instead of paused
    #[serde(default)]
    pub do_not_pause: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    1
}

/// Storage configuration for the database data volume
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "10Gi")
    pub size: String,
}

/// Resource requirements for database pods
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Reference to a Secret in the database namespace
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_source: Option<SnapshotSource>,
}

/// Snapshot to restore from. Namespace defaults to the database namespace.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSource {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Periodic snapshot configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    /// Standard five-field cron expression or a `@daily` style macro
    pub cron_expression: String,

    pub storage: SnapshotStorageSpec,
}

/// Object storage location for snapshots
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStorageSpec {
    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// S3-compatible endpoint (uses AWS default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Secret with the storage credentials
    pub storage_secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Monitoring agent, e.g. "prometheus"
    pub agent: String,

    #[serde(default = "default_monitor_port")]
    pub port: i32,
}

fn default_monitor_port() -> i32 {
    9187
}

/// Status of a ManagedDatabase
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatabaseStatus {
    #[serde(default)]
    pub phase: DatabasePhase,

    /// RFC 3339 time the current create cycle started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    /// Generation last processed by a create or update, successful or not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Set on failure: false when the failure only clears with a spec change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Lifecycle phase shared by ManagedDatabase and DormantDatabase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum DatabasePhase {
    /// Not yet observed by the controller
    #[default]
    Pending,
    Creating,
    /// Restoring data from a snapshot
    Initializing,
    Running,
    Pausing,
    Paused,
    Resuming,
    WipingOut,
    WipedOut,
    Failed,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatabasePhase::Pending => "Pending",
            DatabasePhase::Creating => "Creating",
            DatabasePhase::Initializing => "Initializing",
            DatabasePhase::Running => "Running",
            DatabasePhase::Pausing => "Pausing",
            DatabasePhase::Paused => "Paused",
            DatabasePhase::Resuming => "Resuming",
            DatabasePhase::WipingOut => "WipingOut",
            DatabasePhase::WipedOut => "WipedOut",
            DatabasePhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

impl ManagedDatabase {
    /// Current phase, `Pending` when no status was written yet
    pub fn phase(&self) -> DatabasePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Name of the admin credentials secret, applying the default
    pub fn secret_name(&self) -> String {
        match &self.spec.database_secret {
            Some(secret) => secret.secret_name.clone(),
            None => default_secret_name(self.metadata.name.as_deref().unwrap_or_default()),
        }
    }

    pub fn snapshot_source(&self) -> Option<&SnapshotSource> {
        self.spec
            .init
            .as_ref()
            .and_then(|init| init.snapshot_source.as_ref())
    }
}

/// Default admin secret name for a database
pub fn default_secret_name(database_name: &str) -> String {
    format!("{}-admin-auth", database_name)
}
