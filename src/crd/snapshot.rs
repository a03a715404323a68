use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::SnapshotStorageSpec;

/// Snapshot is a point-in-time backup of a ManagedDatabase in object storage
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "managed-db-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "Snapshot",
    plural = "snapshots",
    shortname = "snap",
    namespaced,
    status = "SnapshotStatus",
    printcolumn = r#"{"name":"Database", "type":"string", "jsonPath":".spec.databaseName"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Database the snapshot was taken from
    pub database_name: String,

    pub storage: SnapshotStorageSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    #[serde(default)]
    pub phase: SnapshotPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum SnapshotPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotPhase::Pending => write!(f, "Pending"),
            SnapshotPhase::Running => write!(f, "Running"),
            SnapshotPhase::Succeeded => write!(f, "Succeeded"),
            SnapshotPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl Snapshot {
    pub fn phase(&self) -> SnapshotPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
