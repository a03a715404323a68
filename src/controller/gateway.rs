//! Collaborator interfaces consumed by the lifecycle controller
//!
//! The controller never talks to the Kubernetes API directly. Each concern is
//! behind a trait so the decision logic can run against the kube-backed
//! implementations in `crate::resources` or against in-memory fakes.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::controller::error::Result;
use crate::crd::{BackupScheduleSpec, DormantDatabase, ManagedDatabase, Snapshot};
use crate::resources::common::LabelSelectorSet;

/// Whether an ensure call had to create the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Existing,
}

impl EnsureOutcome {
    pub fn created(self) -> bool {
        self == EnsureOutcome::Created
    }
}

/// Observed state of a restore job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Active,
    Succeeded,
    Failed(String),
}

/// Optimistic-concurrency store for the operator's custom resources.
///
/// `replace_*` calls carry the resourceVersion that was read; a stale version
/// fails with a conflict error. Deleting an absent object succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseStore: Send + Sync {
    async fn get_database(&self, namespace: &str, name: &str) -> Result<Option<ManagedDatabase>>;
    async fn create_database(&self, db: &ManagedDatabase) -> Result<ManagedDatabase>;
    /// Replace metadata and spec
    async fn replace_database(&self, db: &ManagedDatabase) -> Result<ManagedDatabase>;
    async fn replace_database_status(&self, db: &ManagedDatabase) -> Result<ManagedDatabase>;
    async fn delete_database(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_dormant(&self, namespace: &str, name: &str) -> Result<Option<DormantDatabase>>;
    async fn create_dormant(&self, dormant: &DormantDatabase) -> Result<DormantDatabase>;
    async fn replace_dormant(&self, dormant: &DormantDatabase) -> Result<DormantDatabase>;
    async fn replace_dormant_status(&self, dormant: &DormantDatabase) -> Result<DormantDatabase>;
    async fn delete_dormant(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>>;
    /// Names of the snapshots carrying the selector labels
    async fn list_snapshots(&self, namespace: &str, selector: &LabelSelectorSet)
    -> Result<Vec<String>>;
    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<()>;

    /// Names of the volume claims carrying the selector labels
    async fn list_volume_claims(
        &self,
        namespace: &str,
        selector: &LabelSelectorSet,
    ) -> Result<Vec<String>>;
    async fn delete_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Idempotent creation and deletion of a database's sub-resources.
///
/// `ensure_*` creates an object when it is absent and leaves an existing one
/// as it is.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Infrastructure: Send + Sync {
    /// Shared headless Service of a namespace
    async fn ensure_governing_service(&self, namespace: &str, name: &str)
    -> Result<EnsureOutcome>;
    async fn ensure_service(&self, db: &ManagedDatabase) -> Result<EnsureOutcome>;
    async fn ensure_rbac(&self, db: &ManagedDatabase) -> Result<()>;
    async fn ensure_database_secret(&self, db: &ManagedDatabase) -> Result<EnsureOutcome>;
    async fn ensure_statefulset(&self, db: &ManagedDatabase) -> Result<EnsureOutcome>;
    /// Whether every desired pod of the workload reports ready
    async fn statefulset_ready(&self, db: &ManagedDatabase) -> Result<bool>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_rbac(&self, namespace: &str, name: &str) -> Result<()>;
}

/// One-shot restore jobs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestoreBackend: Send + Sync {
    /// Write the snapshot's storage credentials into a secret the job can mount.
    /// Returns the secret name.
    async fn materialize_credentials(
        &self,
        db: &ManagedDatabase,
        snapshot: &Snapshot,
    ) -> Result<String>;
    /// Returns the job name
    async fn create_restore_job(
        &self,
        db: &ManagedDatabase,
        snapshot: &Snapshot,
        credentials_secret: &str,
    ) -> Result<String>;
    async fn job_state(&self, namespace: &str, job_name: &str) -> Result<JobState>;
    async fn cleanup(&self, namespace: &str, job_name: &str, credentials_secret: &str)
    -> Result<()>;
}

/// Spec validation rules
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, db: &ManagedDatabase) -> Result<()>;
}

/// Monitoring attachment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitorGateway: Send + Sync {
    async fn add(&self, db: &ManagedDatabase) -> Result<()>;
    async fn update(&self, db: &ManagedDatabase) -> Result<()>;
    async fn delete(&self, db: &ManagedDatabase) -> Result<()>;
}

/// Periodic snapshot job bound to a database's identity
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupScheduler: Send + Sync {
    /// Start or replace the schedule
    async fn schedule(&self, db: &ManagedDatabase, schedule: &BackupScheduleSpec) -> Result<()>;
    /// Stopping an absent schedule succeeds
    async fn stop(&self, namespace: &str, name: &str) -> Result<()>;
}
