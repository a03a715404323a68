//! Watch adapters for ManagedDatabase and DormantDatabase
//!
//! Maps each observed object onto the lifecycle operations and translates
//! their results into requeue decisions for the kube-runtime controllers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::dormant::{DORMANT_FINALIZER, DormantReconciler, next_dormant_action};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::lifecycle::{CreateOutcome, LifecycleReconciler, PauseOutcome};
use crate::controller::status::{StatusReporter, failure_retryable, object_key, spec_changed};
use crate::crd::{DatabasePhase, DormantDatabase, ManagedDatabase, ManagedDatabaseSpec};

/// Finalizer held on ManagedDatabases so deletion pauses them first
pub const FINALIZER: &str = "managed-db-operator.smoketurner.com/finalizer";

/// Periodic resync of a settled database
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum time between create attempts of a failed database with an unchanged spec
const FAILED_RETRY_INTERVAL: Duration = Duration::from_secs(60);

fn default_backoff() -> BackoffConfig {
    BackoffConfig::default()
}

/// Reconcile a ManagedDatabase
#[instrument(skip(db, ctx), fields(name = %db.name_any(), namespace = db.namespace().unwrap_or_default()))]
pub async fn reconcile(db: Arc<ManagedDatabase>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_database(&db, &ctx).await;
    record_result("ManagedDatabase", db.as_ref(), &ctx, started, &result);
    result
}

async fn reconcile_database(db: &ManagedDatabase, ctx: &Context) -> Result<Action> {
    let lifecycle = LifecycleReconciler::new(ctx);

    if db.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(db, FINALIZER) {
            return Ok(Action::await_change());
        }
        match lifecycle.pause(db).await? {
            // The finalizer was released before recreating
            PauseOutcome::Locked => {}
            PauseOutcome::Ignored | PauseOutcome::Paused(_) => {
                release_database_finalizer(db, ctx).await?;
            }
            PauseOutcome::Aborted(reason) => {
                warn!(%reason, "Pause aborted, completing deletion without a dormant record");
                release_database_finalizer(db, ctx).await?;
            }
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(db, FINALIZER) {
        add_database_finalizer(db, ctx).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    match db.phase() {
        DatabasePhase::Pending | DatabasePhase::Creating | DatabasePhase::Initializing => {
            run_create(&lifecycle, db, ctx).await
        }
        DatabasePhase::Failed => {
            if !spec_changed(db) {
                if !failure_retryable(db) {
                    debug!("Failed database needs a spec change before another attempt");
                    return Ok(Action::await_change());
                }
                let wait = retry_wait(db, Utc::now());
                if !wait.is_zero() {
                    debug!(?wait, "Failed database with unchanged spec, waiting before retry");
                    return Ok(Action::requeue(wait));
                }
            }
            run_create(&lifecycle, db, ctx).await
        }
        DatabasePhase::Running if spec_changed(db) => {
            let (namespace, name) = object_key(db)?;
            let old = match ctx.applied_spec(&namespace, &name).await {
                Some(spec) => spec,
                None => restart_baseline(&db.spec),
            };
            info!(
                generation = ?db.metadata.generation,
                observed = ?db.status.as_ref().and_then(|s| s.observed_generation),
                "Spec changed, updating"
            );
            let report = lifecycle.update(&old, db).await?;
            note_advisories(db, ctx, report.advisories.len());
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        _ => Ok(Action::requeue(RESYNC_INTERVAL)),
    }
}

async fn run_create(lifecycle: &LifecycleReconciler<'_>, db: &ManagedDatabase, ctx: &Context) -> Result<Action> {
    match lifecycle.create(db).await? {
        CreateOutcome::Provisioned(report) => {
            note_advisories(db, ctx, report.advisories.len());
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        CreateOutcome::ResumeRequested => Ok(Action::await_change()),
    }
}

/// Old-spec stand-in after a restart: backup schedule and monitor are
/// treated as absent so both are applied again.
pub fn restart_baseline(spec: &ManagedDatabaseSpec) -> ManagedDatabaseSpec {
    ManagedDatabaseSpec {
        backup_schedule: None,
        monitor: None,
        ..spec.clone()
    }
}

/// Time left before a failed database may be created again
pub fn retry_wait(db: &ManagedDatabase, now: DateTime<Utc>) -> Duration {
    let last_attempt = db
        .status
        .as_ref()
        .and_then(|s| s.creation_time.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let Some(last_attempt) = last_attempt else {
        return Duration::ZERO;
    };
    let elapsed = (now - last_attempt).to_std().unwrap_or(Duration::ZERO);
    FAILED_RETRY_INTERVAL.saturating_sub(elapsed)
}

/// Error policy for the ManagedDatabase controller with exponential backoff
pub fn error_policy(db: Arc<ManagedDatabase>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_after_error(&db.name_any(), error)
}

/// Reconcile a DormantDatabase
#[instrument(skip(dormant, ctx), fields(name = %dormant.name_any(), namespace = dormant.namespace().unwrap_or_default()))]
pub async fn reconcile_dormant(dormant: Arc<DormantDatabase>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_dormant_database(&dormant, &ctx).await;
    record_result("DormantDatabase", dormant.as_ref(), &ctx, started, &result);
    result
}

async fn reconcile_dormant_database(dormant: &DormantDatabase, ctx: &Context) -> Result<Action> {
    let terminating = dormant.metadata.deletion_timestamp.is_some();
    if terminating && !has_finalizer(dormant, DORMANT_FINALIZER) {
        return Ok(Action::await_change());
    }
    if !terminating && !has_finalizer(dormant, DORMANT_FINALIZER) {
        let (namespace, name) = object_key(dormant)?;
        StatusReporter::new(ctx)
            .update_dormant(&namespace, &name, |d| {
                if !d.finalizers().iter().any(|f| f == DORMANT_FINALIZER) {
                    d.finalizers_mut().push(DORMANT_FINALIZER.to_string());
                }
                Ok(())
            })
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let action = next_dormant_action(dormant);
    debug!(?action, phase = %dormant.phase(), "Dormant action");
    DormantReconciler::new(ctx).apply(dormant, action).await?;
    Ok(Action::await_change())
}

pub fn dormant_error_policy(dormant: Arc<DormantDatabase>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_after_error(&dormant.name_any(), error)
}

fn requeue_after_error(name: &str, error: &Error) -> Action {
    let backoff = default_backoff();
    // kube-runtime does not hand us a retry count; start from the first step
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!("Retryable error for {}: {}, requeuing in {:?}", name, error, delay);
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

fn has_finalizer<K: Resource>(object: &K, finalizer: &str) -> bool {
    object.finalizers().iter().any(|f| f == finalizer)
}

async fn add_database_finalizer(db: &ManagedDatabase, ctx: &Context) -> Result<()> {
    let (namespace, name) = object_key(db)?;
    StatusReporter::new(ctx)
        .update_database(&namespace, &name, |current| {
            if !current.finalizers().iter().any(|f| f == FINALIZER) {
                current.finalizers_mut().push(FINALIZER.to_string());
            }
            Ok(())
        })
        .await?;
    debug!("Added finalizer");
    Ok(())
}

async fn release_database_finalizer(db: &ManagedDatabase, ctx: &Context) -> Result<()> {
    let (namespace, name) = object_key(db)?;
    let result = StatusReporter::new(ctx)
        .update_database(&namespace, &name, |current| {
            current.finalizers_mut().retain(|f| f != FINALIZER);
            Ok(())
        })
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

fn note_advisories(db: &ManagedDatabase, ctx: &Context, count: usize) {
    if let Some(health) = &ctx.health {
        health.metrics.record_advisories(
            "ManagedDatabase",
            &db.namespace().unwrap_or_default(),
            &db.name_any(),
            count,
        );
    }
}

fn record_result<K: Resource>(kind: &str, object: &K, ctx: &Context, started: Instant, result: &Result<Action>) {
    let Some(health) = &ctx.health else {
        return;
    };
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    match result {
        Ok(_) => {
            health
                .metrics
                .record_reconcile(kind, &namespace, &name, started.elapsed().as_secs_f64());
            health.touch();
        }
        Err(_) => health.metrics.record_error(kind, &namespace, &name),
    }
}
