//! Lifecycle operations of a managed database
//!
//! Create, Update, Pause, Resume and WipeOut decide which side effects a
//! lifecycle trigger needs and in which order. Infrastructure work is
//! delegated to the collaborators in [`Context`]; phases are written through
//! [`StatusReporter`]. Steps that are auxiliary to the database's availability
//! (monitoring, backups, restore, the dormant record) never fail an operation:
//! their failures are collected as [`Advisory`] entries in the returned report.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::{info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::matcher::{matches, normalize_spec};
use crate::controller::reconciler::FINALIZER;
use crate::controller::restore::{RestoreOrchestrator, RestoreOutcome};
use crate::controller::retry::{RetryConfig, retry_if};
use crate::controller::state_machine::DatabaseEvent;
use crate::controller::status::{StatusReporter, object_key};
use crate::controller::wait::poll_until;
use crate::crd::{
    DormantDatabase, DormantDatabaseSpec, ManagedDatabase, ManagedDatabaseSpec, Origin, OriginMeta,
};
use crate::resources::common::{
    ANNOTATION_IGNORE, ANNOTATION_INIT_SPEC, KIND, LABEL_DATABASE_KIND, LabelSelectorSet,
    offshoot_name,
};

/// A best-effort step that failed without failing the operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub step: &'static str,
    pub message: String,
}

/// Advisory outcomes of one lifecycle operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub advisories: Vec<Advisory>,
    /// Outcome of the snapshot restore, when one ran
    pub restore: Option<RestoreOutcome>,
}

impl ReconcileReport {
    fn advise(&mut self, step: &'static str, message: impl Into<String>) {
        let message = message.into();
        warn!(step, %message, "Best-effort step failed");
        self.advisories.push(Advisory { step, message });
    }

    pub fn is_clean(&self) -> bool {
        self.advisories.is_empty()
    }

    pub fn has_advisory(&self, step: &str) -> bool {
        self.advisories.iter().any(|a| a.step == step)
    }
}

/// Advisory step names
pub mod steps {
    pub const MONITOR: &str = "monitor";
    pub const BACKUP_SCHEDULE: &str = "backup-schedule";
    pub const RESTORE: &str = "restore";
    pub const DORMANT_RECORD: &str = "dormant-record";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Workload created or already present, phase Running
    Provisioned(ReconcileReport),
    /// The request duplicated a paused database; it was deleted and the
    /// dormant record flagged for resume
    ResumeRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    /// Deletion was part of a resume
    Ignored,
    /// `doNotPause` vetoed the deletion and the database was recreated
    Locked,
    Paused(ReconcileReport),
    /// The dormant record could not be written. Nothing else was touched.
    Aborted(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeOutReport {
    pub snapshots_deleted: usize,
    pub volume_claims_deleted: usize,
}

/// Retries for recreating a locked database whose previous incarnation is
/// still being removed from the store
fn recreate_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 2.0,
    }
}

pub struct LifecycleReconciler<'a> {
    ctx: &'a Context,
    reporter: StatusReporter<'a>,
}

impl<'a> LifecycleReconciler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            reporter: StatusReporter::new(ctx),
        }
    }

    /// First observation of a ManagedDatabase
    pub async fn create(&self, db: &ManagedDatabase) -> Result<CreateOutcome> {
        let (namespace, name) = object_key(db)?;

        self.reporter
            .transition_database(db, DatabaseEvent::StartCreate, None)
            .await?;

        if let Err(e) = self.ctx.validator.validate(db).await {
            self.reporter
                .warning(db, reasons::FAILED_TO_VALIDATE, &e.to_string())
                .await;
            return Err(self.fail(db, e).await);
        }
        self.reporter
            .normal(db, reasons::SUCCESSFUL_VALIDATE, "Successfully validated ManagedDatabase")
            .await;

        let matched = match matches(self.ctx, db).await {
            Ok(matched) => matched,
            Err(e) => return Err(self.fail(db, e).await),
        };
        if matched {
            self.request_resume(&namespace, &name).await?;
            return Ok(CreateOutcome::ResumeRequested);
        }

        self.reporter
            .normal(db, reasons::CREATING, "Creating ManagedDatabase")
            .await;

        // Readiness and restore belong to the create cycle; a retried cycle
        // repeats them even when the StatefulSet already exists
        if let Err(e) = self.ensure_workload(db).await {
            return Err(self.fail(db, e).await);
        }
        if let Err(e) = self.await_pods(db).await {
            return Err(self.fail(db, e).await);
        }
        self.reporter
            .normal(db, reasons::SUCCESSFUL_CREATE, "Successfully created ManagedDatabase")
            .await;

        let mut report = ReconcileReport::default();

        if db.snapshot_source().is_some() {
            self.reporter
                .transition_database(db, DatabaseEvent::StartInitialize, None)
                .await?;
            let outcome = RestoreOrchestrator::new(self.ctx).restore(db).await?;
            match &outcome {
                RestoreOutcome::Succeeded => {}
                RestoreOutcome::Failed(reason) => report.advise(steps::RESTORE, reason.clone()),
                RestoreOutcome::TimedOut => report.advise(steps::RESTORE, "restore timed out"),
            }
            report.restore = Some(outcome);
        }

        self.reporter
            .transition_database(db, DatabaseEvent::Provisioned, None)
            .await?;

        self.apply_backup_schedule(db, &mut report).await;

        if db.spec.monitor.is_some()
            && let Err(e) = self.ctx.monitor.add(db).await
        {
            self.reporter
                .warning(db, reasons::FAILED_TO_ADD_MONITOR, &e.to_string())
                .await;
            report.advise(steps::MONITOR, e.to_string());
        }

        self.ctx.remember_spec(&namespace, &name, &db.spec).await;
        info!(
            namespace,
            name,
            advisories = report.advisories.len(),
            restored = ?report.restore.as_ref().map(RestoreOutcome::is_success),
            "ManagedDatabase created"
        );
        Ok(CreateOutcome::Provisioned(report))
    }

    /// Spec change of a running database
    pub async fn update(&self, old: &ManagedDatabaseSpec, db: &ManagedDatabase) -> Result<ReconcileReport> {
        let (namespace, name) = object_key(db)?;

        if let Err(e) = self.ctx.validator.validate(db).await {
            self.reporter
                .warning(db, reasons::FAILED_TO_UPDATE, &e.to_string())
                .await;
            return Err(e);
        }

        let created = match self.ensure_workload(db).await {
            Ok(created) => created,
            Err(e) => {
                self.reporter
                    .warning(db, reasons::FAILED_TO_UPDATE, &e.to_string())
                    .await;
                return Err(e);
            }
        };
        if created {
            self.await_pods(db).await?;
        }

        let mut report = ReconcileReport::default();

        if old.backup_schedule != db.spec.backup_schedule {
            self.apply_backup_schedule(db, &mut report).await;
        }

        if old.monitor != db.spec.monitor {
            let (result, reason) = match (&old.monitor, &db.spec.monitor) {
                (None, Some(_)) => (self.ctx.monitor.add(db).await, reasons::FAILED_TO_ADD_MONITOR),
                (Some(_), None) => (
                    self.ctx.monitor.delete(db).await,
                    reasons::FAILED_TO_DELETE_MONITOR,
                ),
                _ => (
                    self.ctx.monitor.update(db).await,
                    reasons::FAILED_TO_UPDATE_MONITOR,
                ),
            };
            if let Err(e) = result {
                self.reporter.warning(db, reason, &e.to_string()).await;
                report.advise(steps::MONITOR, e.to_string());
            }
        }

        // Records the applied generation; the phase stays Running
        self.reporter
            .transition_database(db, DatabaseEvent::Provisioned, None)
            .await?;
        self.ctx.remember_spec(&namespace, &name, &db.spec).await;
        self.reporter
            .normal(db, reasons::SUCCESSFUL_UPDATE, "Successfully updated ManagedDatabase")
            .await;
        Ok(report)
    }

    /// Deletion of a ManagedDatabase. The caller holds the finalizer and
    /// releases it afterwards unless an error is returned or the outcome is
    /// `Locked` (which already released it).
    pub async fn pause(&self, db: &ManagedDatabase) -> Result<PauseOutcome> {
        let (namespace, name) = object_key(db)?;

        if db.annotations().contains_key(ANNOTATION_IGNORE) {
            self.reporter
                .normal(
                    db,
                    reasons::IGNORED,
                    &format!(r#"ManagedDatabase "{}" deleted to resume its DormantDatabase"#, name),
                )
                .await;
            self.ctx.forget_spec(&namespace, &name).await;
            return Ok(PauseOutcome::Ignored);
        }

        if db.spec.do_not_pause {
            self.reporter
                .warning(
                    db,
                    reasons::FAILED_TO_PAUSE,
                    &format!(r#"ManagedDatabase "{}" is locked."#, name),
                )
                .await;
            self.recreate(db, &namespace, &name).await?;
            return Ok(PauseOutcome::Locked);
        }

        self.reporter
            .normal(db, reasons::PAUSING, "Pausing ManagedDatabase")
            .await;
        self.reporter
            .transition_database(db, DatabaseEvent::StartPause, None)
            .await?;

        let mut report = ReconcileReport::default();

        if let Err(e) = self.create_dormant(db).await {
            let message = format!("Failed to create DormantDatabase: {}", e);
            self.reporter
                .warning(db, reasons::FAILED_TO_PAUSE, &message)
                .await;
            report.advise(steps::DORMANT_RECORD, message.clone());
            return Ok(PauseOutcome::Aborted(message));
        }

        if let Err(e) = self.ctx.backup.stop(&namespace, &name).await {
            report.advise(steps::BACKUP_SCHEDULE, e.to_string());
        }

        if db.spec.monitor.is_some()
            && let Err(e) = self.ctx.monitor.delete(db).await
        {
            self.reporter
                .warning(db, reasons::FAILED_TO_DELETE_MONITOR, &e.to_string())
                .await;
            report.advise(steps::MONITOR, e.to_string());
        }

        let infrastructure = self.ctx.infrastructure.as_ref();
        let workload = offshoot_name(&name);
        let deletions = [
            ("Service", infrastructure.delete_service(&namespace, &workload).await),
            ("StatefulSet", infrastructure.delete_statefulset(&namespace, &workload).await),
            ("RBAC", infrastructure.delete_rbac(&namespace, &name).await),
        ];
        let mut first_error = None;
        for (what, result) in deletions {
            if let Err(e) = result {
                self.reporter
                    .warning(
                        db,
                        reasons::FAILED_TO_DELETE,
                        &format!("Failed to delete {}. Reason: {}", what, e),
                    )
                    .await;
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.ctx.forget_spec(&namespace, &name).await;
        self.reporter
            .normal(db, reasons::SUCCESSFUL_PAUSE, "Successfully paused ManagedDatabase")
            .await;
        Ok(PauseOutcome::Paused(report))
    }

    /// Recreate the ManagedDatabase preserved in a dormant record
    pub async fn resume(&self, dormant: &DormantDatabase) -> Result<ManagedDatabase> {
        ensure_resumable(dormant)?;
        let db = database_from_dormant(dormant);

        match self.ctx.store.create_database(&db).await {
            Ok(created) => {
                self.reporter
                    .normal(
                        dormant,
                        reasons::SUCCESSFUL_RESUME,
                        &format!(r#"Successfully resumed ManagedDatabase "{}""#, db.name_any()),
                    )
                    .await;
                Ok(created)
            }
            Err(e) => {
                self.reporter
                    .warning(
                        dormant,
                        reasons::FAILED_TO_RESUME,
                        &format!("Failed to create ManagedDatabase. Reason: {}", e),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Permanently delete the snapshots and volume claims of a dormant database.
    ///
    /// Secrets are left in place: they may be shared with other databases.
    pub async fn wipe_out(&self, dormant: &DormantDatabase) -> Result<WipeOutReport> {
        let (namespace, _) = object_key(dormant)?;
        let kind = dormant
            .labels()
            .get(LABEL_DATABASE_KIND)
            .cloned()
            .unwrap_or_else(|| KIND.to_string());
        let selector = LabelSelectorSet::new(dormant.spec.origin.metadata.name.clone(), kind);
        let store = self.ctx.store.as_ref();

        let mut report = WipeOutReport::default();

        for snapshot in store.list_snapshots(&namespace, &selector).await? {
            store.delete_snapshot(&namespace, &snapshot).await?;
            report.snapshots_deleted += 1;
        }

        for claim in store.list_volume_claims(&namespace, &selector).await? {
            store.delete_volume_claim(&namespace, &claim).await?;
            report.volume_claims_deleted += 1;
        }

        info!(
            namespace,
            selector = %selector.to_selector(),
            snapshots = report.snapshots_deleted,
            volume_claims = report.volume_claims_deleted,
            "Wiped out dormant database data"
        );
        Ok(report)
    }

    /// Ensure the shared and per-database objects. Each one is created if
    /// absent and left alone otherwise. Returns whether the StatefulSet had to
    /// be created.
    async fn ensure_workload(&self, db: &ManagedDatabase) -> Result<bool> {
        let namespace = db.namespace().unwrap_or_default();
        let infrastructure = self.ctx.infrastructure.as_ref();

        infrastructure
            .ensure_governing_service(&namespace, &self.ctx.config.governing_service)
            .await?;
        infrastructure.ensure_rbac(db).await?;
        infrastructure.ensure_database_secret(db).await?;
        infrastructure.ensure_service(db).await?;

        match infrastructure.ensure_statefulset(db).await {
            Ok(outcome) => Ok(outcome.created()),
            Err(e) => {
                self.reporter
                    .warning(
                        db,
                        reasons::FAILED_TO_CREATE,
                        &format!("Failed to create StatefulSet. Reason: {}", e),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn await_pods(&self, db: &ManagedDatabase) -> Result<()> {
        if let Err(e) = self.wait_ready(db).await {
            self.reporter
                .warning(
                    db,
                    reasons::FAILED_TO_START,
                    &format!("Failed to create StatefulSet. Reason: {}", e),
                )
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn wait_ready(&self, db: &ManagedDatabase) -> Result<()> {
        let infrastructure = self.ctx.infrastructure.as_ref();
        poll_until(
            &format!("pods of StatefulSet {}", db.name_any()),
            self.ctx.config.readiness_timeout,
            self.ctx.config.readiness_poll_interval,
            &self.ctx.shutdown,
            move || async move {
                Ok(infrastructure.statefulset_ready(db).await?.then_some(()))
            },
        )
        .await
    }

    async fn apply_backup_schedule(&self, db: &ManagedDatabase, report: &mut ReconcileReport) {
        let (namespace, name) = (db.namespace().unwrap_or_default(), db.name_any());
        let result = match &db.spec.backup_schedule {
            Some(schedule) => self.ctx.backup.schedule(db, schedule).await,
            None => self.ctx.backup.stop(&namespace, &name).await,
        };
        if let Err(e) = result {
            self.reporter
                .warning(
                    db,
                    reasons::FAILED_TO_SCHEDULE,
                    &format!("Failed to schedule snapshot. Reason: {}", e),
                )
                .await;
            report.advise(steps::BACKUP_SCHEDULE, e.to_string());
        }
    }

    async fn request_resume(&self, namespace: &str, name: &str) -> Result<()> {
        self.reporter
            .update_database(namespace, name, |current| {
                current
                    .annotations_mut()
                    .insert(ANNOTATION_IGNORE.to_string(), "true".to_string());
                Ok(())
            })
            .await?;
        self.ctx.store.delete_database(namespace, name).await?;

        let dormant = self
            .reporter
            .update_dormant(namespace, name, |dormant| {
                dormant.spec.resume = true;
                Ok(())
            })
            .await?;
        self.reporter
            .normal(
                &dormant,
                reasons::RESUME_REQUESTED,
                &format!(r#"ManagedDatabase "{}" matches this DormantDatabase, resuming"#, name),
            )
            .await;
        info!(namespace, name, "Create request resolved to resume of dormant database");
        Ok(())
    }

    async fn create_dormant(&self, db: &ManagedDatabase) -> Result<()> {
        let dormant = dormant_from_database(db)?;
        match self.ctx.store.create_dormant(&dormant).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Release the finalizer of a locked database and create it again
    async fn recreate(&self, db: &ManagedDatabase, namespace: &str, name: &str) -> Result<()> {
        match self
            .reporter
            .update_database(namespace, name, |current| {
                current.finalizers_mut().retain(|f| f != FINALIZER);
                Ok(())
            })
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let fresh = ManagedDatabase {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: db.metadata.labels.clone(),
                annotations: db.metadata.annotations.clone(),
                ..Default::default()
            },
            spec: db.spec.clone(),
            status: None,
        };

        let store = self.ctx.store.as_ref();
        let fresh = &fresh;
        retry_if(
            &recreate_retry(),
            "recreate_locked_database",
            Error::is_already_exists,
            move || async move { store.create_database(fresh).await },
        )
        .await?;
        info!(namespace, name, "Recreated locked ManagedDatabase");
        Ok(())
    }

    /// Move the database to Failed with the error as reason and hand the error back
    async fn fail(&self, db: &ManagedDatabase, error: Error) -> Error {
        if let Err(e) = self.reporter.fail_database(db, &error).await {
            warn!(error = %e, "Failed to record Failed phase");
        }
        error
    }
}

/// Reject dormant records that cannot be resumed
pub fn ensure_resumable(dormant: &DormantDatabase) -> Result<()> {
    if dormant.spec.origin.spec.init.is_some() {
        return Err(Error::ValidationError(
            "resuming a database with spec.origin.spec.init is not supported".to_string(),
        ));
    }
    Ok(())
}

/// Snapshot a database into a dormant record
pub fn dormant_from_database(db: &ManagedDatabase) -> Result<DormantDatabase> {
    let (namespace, name) = object_key(db)?;

    let mut annotations = BTreeMap::new();
    if let Some(init) = &db.spec.init {
        annotations.insert(ANNOTATION_INIT_SPEC.to_string(), serde_json::to_string(init)?);
    }

    let mut origin_annotations = db.annotations().clone();
    origin_annotations.remove(ANNOTATION_IGNORE);

    Ok(DormantDatabase {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(BTreeMap::from([(
                LABEL_DATABASE_KIND.to_string(),
                KIND.to_string(),
            )])),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: DormantDatabaseSpec {
            origin: Origin {
                metadata: OriginMeta {
                    name: name.clone(),
                    namespace,
                    labels: db.labels().clone(),
                    annotations: origin_annotations,
                },
                spec: normalize_spec(&name, &db.spec),
            },
            resume: false,
            wipe_out: false,
        },
        status: None,
    })
}

/// Rebuild the ManagedDatabase a dormant record preserves. The record's own
/// annotations win over the origin's on key collision.
pub fn database_from_dormant(dormant: &DormantDatabase) -> ManagedDatabase {
    let origin = &dormant.spec.origin;
    let mut annotations = origin.metadata.annotations.clone();
    annotations.extend(dormant.annotations().clone());

    ManagedDatabase {
        metadata: ObjectMeta {
            name: Some(origin.metadata.name.clone()),
            namespace: Some(origin.metadata.namespace.clone()),
            labels: (!origin.metadata.labels.is_empty()).then(|| origin.metadata.labels.clone()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: origin.spec.clone(),
        status: None,
    }
}
