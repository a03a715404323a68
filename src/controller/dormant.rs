//! Lifecycle of DormantDatabase records
//!
//! A dormant record is first marked Paused. Setting `wipeOut` destroys its
//! data; setting `resume` (by a user or by a matching create request) moves
//! it to Resuming and deletes it. The record's finalizer is held until the
//! ManagedDatabase has been recreated, so a failed resume keeps the record.

use kube::ResourceExt;
use tracing::info;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::lifecycle::{LifecycleReconciler, ensure_resumable};
use crate::controller::state_machine::DatabaseEvent;
use crate::controller::status::{StatusReporter, object_key};
use crate::crd::{DatabasePhase, DormantDatabase};
use crate::resources::common::ANNOTATION_IGNORE;

/// Finalizer held on dormant records
pub const DORMANT_FINALIZER: &str = "managed-db-operator.smoketurner.com/dormant-finalizer";

/// What the next reconciliation of a dormant record must do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DormantAction {
    /// First observation
    MarkPaused,
    WipeOut,
    /// Move to Resuming and delete the record
    Resume,
    /// Resuming record whose delete has not been observed yet
    DeleteForResume,
    /// Terminating record in Resuming: recreate the database, then release
    ResumeAndRelease,
    /// Terminating record outside a resume
    Release,
    /// Resume requested on a record whose data is gone
    RejectResume,
    Idle,
}

/// Decide the next action from the observed record
pub fn next_dormant_action(dormant: &DormantDatabase) -> DormantAction {
    let phase = dormant.phase();
    let spec = &dormant.spec;

    if dormant.metadata.deletion_timestamp.is_some() {
        return if phase == DatabasePhase::Resuming {
            DormantAction::ResumeAndRelease
        } else {
            DormantAction::Release
        };
    }

    match phase {
        DatabasePhase::Pending => DormantAction::MarkPaused,
        DatabasePhase::WipingOut => DormantAction::WipeOut,
        DatabasePhase::WipedOut if spec.resume => DormantAction::RejectResume,
        DatabasePhase::Resuming => DormantAction::DeleteForResume,
        DatabasePhase::Paused | DatabasePhase::Failed if spec.wipe_out => DormantAction::WipeOut,
        DatabasePhase::Paused if spec.resume => DormantAction::Resume,
        _ => DormantAction::Idle,
    }
}

/// Executes dormant record actions
pub struct DormantReconciler<'a> {
    ctx: &'a Context,
    reporter: StatusReporter<'a>,
}

impl<'a> DormantReconciler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            reporter: StatusReporter::new(ctx),
        }
    }

    pub async fn apply(&self, dormant: &DormantDatabase, action: DormantAction) -> Result<()> {
        let (namespace, name) = object_key(dormant)?;

        match action {
            DormantAction::MarkPaused => {
                self.reporter
                    .transition_dormant(dormant, DatabaseEvent::Paused, None)
                    .await?;
            }
            DormantAction::WipeOut => {
                self.reporter
                    .transition_dormant(dormant, DatabaseEvent::StartWipeOut, None)
                    .await?;
                self.reporter
                    .normal(dormant, reasons::WIPING_OUT, "Wiping out DormantDatabase")
                    .await;
                match LifecycleReconciler::new(self.ctx).wipe_out(dormant).await {
                    Ok(report) => {
                        self.reporter
                            .transition_dormant(dormant, DatabaseEvent::WipedOut, None)
                            .await?;
                        self.reporter
                            .normal(
                                dormant,
                                reasons::SUCCESSFUL_WIPE_OUT,
                                &format!(
                                    "Successfully wiped out DormantDatabase: {} snapshots, {} volume claims deleted",
                                    report.snapshots_deleted, report.volume_claims_deleted
                                ),
                            )
                            .await;
                    }
                    Err(e) => {
                        self.reporter
                            .warning(
                                dormant,
                                reasons::FAILED_TO_WIPE_OUT,
                                &format!("Failed to wipe out DormantDatabase. Reason: {}", e),
                            )
                            .await;
                        return Err(e);
                    }
                }
            }
            DormantAction::Resume => {
                if let Err(e) = ensure_resumable(dormant) {
                    self.reporter
                        .warning(dormant, reasons::FAILED_TO_RESUME, &e.to_string())
                        .await;
                    self.clear_resume(&namespace, &name, e.to_string()).await?;
                    return Ok(());
                }
                self.reporter
                    .transition_dormant(dormant, DatabaseEvent::StartResume, None)
                    .await?;
                self.reporter
                    .normal(dormant, reasons::RESUMING, "Resuming DormantDatabase")
                    .await;
                self.ctx.store.delete_dormant(&namespace, &name).await?;
            }
            DormantAction::DeleteForResume => {
                self.ctx.store.delete_dormant(&namespace, &name).await?;
            }
            DormantAction::ResumeAndRelease => {
                if !self.database_resumed(&namespace, &name).await? {
                    LifecycleReconciler::new(self.ctx).resume(dormant).await?;
                }
                self.release(&namespace, &name).await?;
                info!(namespace, name, "DormantDatabase resumed");
            }
            DormantAction::Release => {
                self.release(&namespace, &name).await?;
            }
            DormantAction::RejectResume => {
                self.reporter
                    .warning(
                        dormant,
                        reasons::FAILED_TO_RESUME,
                        "DormantDatabase is wiped out and cannot be resumed",
                    )
                    .await;
                self.clear_resume(&namespace, &name, "wiped out".to_string())
                    .await?;
            }
            DormantAction::Idle => {}
        }
        Ok(())
    }

    async fn clear_resume(&self, namespace: &str, name: &str, reason: String) -> Result<()> {
        self.reporter
            .update_dormant(namespace, name, |d| {
                d.spec.resume = false;
                Ok(())
            })
            .await?;
        self.reporter
            .update_dormant_status(namespace, name, |status| {
                status.reason = Some(reason.clone());
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Whether an earlier attempt already recreated the database.
    ///
    /// The ignored create request that triggered the resume keeps its name
    /// until its own deletion is handled; the record is not released while
    /// that request is still around.
    async fn database_resumed(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.ctx.store.get_database(namespace, name).await? {
            None => Ok(false),
            Some(db)
                if db.metadata.deletion_timestamp.is_some()
                    || db.annotations().contains_key(ANNOTATION_IGNORE) =>
            {
                Err(Error::ConflictError(format!(
                    "ManagedDatabase {}/{} is still being deleted",
                    namespace, name
                )))
            }
            Some(_) => Ok(true),
        }
    }

    async fn release(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .reporter
            .update_dormant(namespace, name, |d| {
                d.finalizers_mut().retain(|f| f != DORMANT_FINALIZER);
                Ok(())
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
