use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{DatabasePhase, ManagedDatabaseSpec};

/// DormantDatabase preserves a paused ManagedDatabase until it is resumed or wiped out
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "managed-db-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "DormantDatabase",
    plural = "dormantdatabases",
    shortname = "drmn",
    namespaced,
    status = "DormantDatabaseStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Resume", "type":"boolean", "jsonPath":".spec.resume"}"#,
    printcolumn = r#"{"name":"WipeOut", "type":"boolean", "jsonPath":".spec.wipeOut"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseSpec {
    /// Frozen copy of the paused database
    pub origin: Origin,

    /// Set to true to recreate the origin database
    #[serde(default)]
    pub resume: bool,

    /// Set to true to permanently delete snapshots and volume claims
    #[serde(default)]
    pub wipe_out: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub metadata: OriginMeta,
    pub spec: ManagedDatabaseSpec,
}

/// The parts of the origin's object metadata needed to rebuild it
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OriginMeta {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseStatus {
    #[serde(default)]
    pub phase: DatabasePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pausing_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wipe_out_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DormantDatabase {
    pub fn phase(&self) -> DatabasePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
