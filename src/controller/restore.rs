//! One-shot data restore from a snapshot into a freshly created workload

use kube::ResourceExt;
use tracing::{info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::gateway::JobState;
use crate::controller::status::StatusReporter;
use crate::controller::wait::poll_until;
use crate::crd::{ManagedDatabase, SnapshotPhase};

/// How a restore attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Succeeded,
    Failed(String),
    /// The job did not finish within the restore timeout
    TimedOut,
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RestoreOutcome::Succeeded)
    }
}

/// Drives a restore job for a database that requests snapshot initialization
pub struct RestoreOrchestrator<'a> {
    ctx: &'a Context,
    reporter: StatusReporter<'a>,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            reporter: StatusReporter::new(ctx),
        }
    }

    /// Run the restore to completion.
    ///
    /// Every failure is reported as an outcome and an event. The only error
    /// returned is `Cancelled`, when the controller shuts down mid-wait.
    pub async fn restore(&self, db: &ManagedDatabase) -> Result<RestoreOutcome> {
        let outcome = self.run(db).await?;
        match &outcome {
            RestoreOutcome::Succeeded => {
                self.reporter
                    .normal(
                        db,
                        reasons::SUCCESSFUL_INITIALIZE,
                        "Successfully completed initialization",
                    )
                    .await;
            }
            RestoreOutcome::Failed(reason) => {
                self.reporter
                    .warning(
                        db,
                        reasons::FAILED_TO_INITIALIZE,
                        &format!("Failed to complete initialization. Reason: {}", reason),
                    )
                    .await;
            }
            RestoreOutcome::TimedOut => {
                self.reporter
                    .warning(
                        db,
                        reasons::FAILED_TO_INITIALIZE,
                        &format!(
                            "Failed to complete initialization. Reason: restore did not finish within {:?}",
                            self.ctx.config.restore_timeout
                        ),
                    )
                    .await;
            }
        }
        Ok(outcome)
    }

    async fn run(&self, db: &ManagedDatabase) -> Result<RestoreOutcome> {
        let Some(source) = db.snapshot_source() else {
            return Ok(RestoreOutcome::Failed("no snapshot source in spec.init".into()));
        };
        let db_namespace = db.namespace().unwrap_or_default();
        let snapshot_namespace = source.namespace.clone().unwrap_or_else(|| db_namespace.clone());

        self.reporter
            .normal(
                db,
                reasons::INITIALIZING,
                &format!(r#"Initializing from Snapshot: "{}""#, source.name),
            )
            .await;

        let snapshot = match self.ctx.store.get_snapshot(&snapshot_namespace, &source.name).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return Ok(RestoreOutcome::Failed(format!(
                    r#"Snapshot "{}/{}" not found"#,
                    snapshot_namespace, source.name
                )));
            }
            Err(e) => return Ok(RestoreOutcome::Failed(e.to_string())),
        };
        if snapshot.phase() != SnapshotPhase::Succeeded {
            return Ok(RestoreOutcome::Failed(format!(
                r#"Snapshot "{}" is {}, not Succeeded"#,
                source.name,
                snapshot.phase()
            )));
        }

        let credentials = match self.ctx.restore.materialize_credentials(db, &snapshot).await {
            Ok(secret) => secret,
            Err(e) => return Ok(RestoreOutcome::Failed(format!("storage secret: {}", e))),
        };

        let job = match self
            .ctx
            .restore
            .create_restore_job(db, &snapshot, &credentials)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.cleanup(&db_namespace, "", &credentials).await;
                return Ok(RestoreOutcome::Failed(format!("restore job: {}", e)));
            }
        };
        info!(namespace = %db_namespace, job = %job, snapshot = %source.name, "Restore job created");

        let restore = self.ctx.restore.as_ref();
        let (ns, job_name) = (db_namespace.as_str(), job.as_str());
        let waited = poll_until(
            "restore job",
            self.ctx.config.restore_timeout,
            self.ctx.config.restore_poll_interval,
            &self.ctx.shutdown,
            move || async move {
                Ok(match restore.job_state(ns, job_name).await? {
                    JobState::Active => None,
                    JobState::Succeeded => Some(RestoreOutcome::Succeeded),
                    JobState::Failed(reason) => Some(RestoreOutcome::Failed(reason)),
                })
            },
        )
        .await;

        let outcome = match waited {
            Ok(outcome) => outcome,
            Err(Error::TimeoutError { .. }) => RestoreOutcome::TimedOut,
            Err(e @ Error::Cancelled(_)) => return Err(e),
            Err(e) => RestoreOutcome::Failed(e.to_string()),
        };

        self.cleanup(&db_namespace, &job, &credentials).await;
        Ok(outcome)
    }

    async fn cleanup(&self, namespace: &str, job: &str, credentials: &str) {
        if let Err(e) = self.ctx.restore.cleanup(namespace, job, credentials).await {
            warn!(namespace, job, error = %e, "Failed to clean up restore resources");
        }
    }
}
