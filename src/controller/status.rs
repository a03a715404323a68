//! Conflict-safe status writes and lifecycle events
//!
//! Every phase transition, finalizer change and annotation write goes through
//! a compare-and-swap cycle: read the current object, apply a pure mutation,
//! write it back with the read resourceVersion, and retry the whole cycle on
//! a conflict.

use std::sync::Mutex;

use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::Severity;
use crate::controller::retry::retry_on_conflict;
use crate::controller::state_machine::{DatabaseEvent, DatabaseStateMachine, TransitionResult};
use crate::crd::{
    DatabasePhase, DormantDatabase, DormantDatabaseStatus, ManagedDatabase, ManagedDatabaseStatus,
};

/// Applies conflict-safe writes and emits events for one reconciliation
pub struct StatusReporter<'a> {
    ctx: &'a Context,
    machine: DatabaseStateMachine,
}

impl<'a> StatusReporter<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            machine: DatabaseStateMachine::new(),
        }
    }

    /// Compare-and-swap on a ManagedDatabase's metadata and spec
    pub async fn update_database<F>(&self, namespace: &str, name: &str, mutate: F) -> Result<ManagedDatabase>
    where
        F: Fn(&mut ManagedDatabase) -> Result<()> + Send + Sync,
    {
        let store = self.ctx.store.as_ref();
        let mutate = &mutate;
        retry_on_conflict(&self.ctx.config.status_retry, "update_database", move || async move {
            let mut db = store
                .get_database(namespace, name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("ManagedDatabase {}/{}", namespace, name)))?;
            mutate(&mut db)?;
            store.replace_database(&db).await
        })
        .await
    }

    /// Compare-and-swap on a ManagedDatabase's status subresource
    pub async fn update_database_status<F>(
        &self,
        namespace: &str,
        name: &str,
        mutate: F,
    ) -> Result<ManagedDatabase>
    where
        F: Fn(&mut ManagedDatabaseStatus) -> Result<()> + Send + Sync,
    {
        let store = self.ctx.store.as_ref();
        let mutate = &mutate;
        retry_on_conflict(&self.ctx.config.status_retry, "update_database_status", move || async move {
            let mut db = store
                .get_database(namespace, name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("ManagedDatabase {}/{}", namespace, name)))?;
            let mut status = db.status.clone().unwrap_or_default();
            mutate(&mut status)?;
            db.status = Some(status);
            store.replace_database_status(&db).await
        })
        .await
    }

    /// Compare-and-swap on a DormantDatabase's metadata and spec
    pub async fn update_dormant<F>(&self, namespace: &str, name: &str, mutate: F) -> Result<DormantDatabase>
    where
        F: Fn(&mut DormantDatabase) -> Result<()> + Send + Sync,
    {
        let store = self.ctx.store.as_ref();
        let mutate = &mutate;
        retry_on_conflict(&self.ctx.config.status_retry, "update_dormant", move || async move {
            let mut dormant = store
                .get_dormant(namespace, name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("DormantDatabase {}/{}", namespace, name)))?;
            mutate(&mut dormant)?;
            store.replace_dormant(&dormant).await
        })
        .await
    }

    pub async fn update_dormant_status<F>(
        &self,
        namespace: &str,
        name: &str,
        mutate: F,
    ) -> Result<DormantDatabase>
    where
        F: Fn(&mut DormantDatabaseStatus) -> Result<()> + Send + Sync,
    {
        let store = self.ctx.store.as_ref();
        let mutate = &mutate;
        retry_on_conflict(&self.ctx.config.status_retry, "update_dormant_status", move || async move {
            let mut dormant = store
                .get_dormant(namespace, name)
                .await?
                .ok_or_else(|| Error::NotFound(format!("DormantDatabase {}/{}", namespace, name)))?;
            let mut status = dormant.status.clone().unwrap_or_default();
            mutate(&mut status)?;
            dormant.status = Some(status);
            store.replace_dormant_status(&dormant).await
        })
        .await
    }

    /// Move a ManagedDatabase to the phase `event` leads to from its stored phase
    pub async fn transition_database(
        &self,
        db: &ManagedDatabase,
        event: DatabaseEvent,
        reason: Option<String>,
    ) -> Result<ManagedDatabase> {
        self.write_database_transition(db, event, reason, None).await
    }

    /// Move a ManagedDatabase to Failed, recording whether the failure can
    /// clear without a spec change
    pub async fn fail_database(&self, db: &ManagedDatabase, error: &Error) -> Result<ManagedDatabase> {
        self.write_database_transition(
            db,
            DatabaseEvent::Fail,
            Some(error.to_string()),
            Some(error.is_retryable()),
        )
        .await
    }

    async fn write_database_transition(
        &self,
        db: &ManagedDatabase,
        event: DatabaseEvent,
        reason: Option<String>,
        retryable: Option<bool>,
    ) -> Result<ManagedDatabase> {
        let (namespace, name) = object_key(db)?;
        let applied = Mutex::new(None);
        let machine = &self.machine;
        let generation = db.metadata.generation;

        let updated = self
            .update_database_status(&namespace, &name, |status| {
                let target = resolve(machine, status.phase, event, &applied)?;
                status.phase = target;
                status.reason = reason.clone();
                status.retryable = retryable;
                match event {
                    DatabaseEvent::StartCreate => {
                        status.creation_time = Some(Utc::now().to_rfc3339());
                    }
                    DatabaseEvent::Provisioned | DatabaseEvent::Fail => {
                        status.observed_generation = generation;
                    }
                    _ => {}
                }
                Ok(())
            })
            .await?;

        self.note_transition("ManagedDatabase", &namespace, &name, &applied);
        Ok(updated)
    }

    /// Move a DormantDatabase to the phase `event` leads to from its stored phase
    pub async fn transition_dormant(
        &self,
        dormant: &DormantDatabase,
        event: DatabaseEvent,
        reason: Option<String>,
    ) -> Result<DormantDatabase> {
        let (namespace, name) = object_key(dormant)?;
        let applied = Mutex::new(None);
        let machine = &self.machine;

        let updated = self
            .update_dormant_status(&namespace, &name, |status| {
                let target = resolve(machine, status.phase, event, &applied)?;
                status.phase = target;
                status.reason = reason.clone();
                match event {
                    DatabaseEvent::Paused if status.pausing_time.is_none() => {
                        status.pausing_time = Some(Utc::now().to_rfc3339());
                    }
                    DatabaseEvent::WipedOut => {
                        status.wipe_out_time = Some(Utc::now().to_rfc3339());
                    }
                    _ => {}
                }
                Ok(())
            })
            .await?;

        self.note_transition("DormantDatabase", &namespace, &name, &applied);
        Ok(updated)
    }

    /// Attach an event to an object
    pub async fn record<K>(&self, object: &K, severity: Severity, reason: &str, message: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        let reference = object.object_ref(&());
        self.ctx
            .events
            .record(&reference, severity, reason, message)
            .await;
    }

    pub async fn normal<K>(&self, object: &K, reason: &str, message: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        self.record(object, Severity::Normal, reason, message).await
    }

    pub async fn warning<K>(&self, object: &K, reason: &str, message: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        self.record(object, Severity::Warning, reason, message).await
    }

    fn note_transition(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        applied: &Mutex<Option<(DatabasePhase, DatabasePhase)>>,
    ) {
        let Some((from, to)) = applied.lock().ok().and_then(|mut guard| guard.take()) else {
            return;
        };
        info!(kind, namespace, name, %from, %to, "Phase transition");
        if let Some(health) = &self.ctx.health {
            health
                .metrics
                .record_transition(kind, &from.to_string(), &to.to_string());
        }
    }
}

/// Resolve `event` against the stored phase, remembering the last applied change
fn resolve(
    machine: &DatabaseStateMachine,
    current: DatabasePhase,
    event: DatabaseEvent,
    applied: &Mutex<Option<(DatabasePhase, DatabasePhase)>>,
) -> Result<DatabasePhase> {
    let result = machine.transition(current, event);
    let change = match &result {
        TransitionResult::Success { from, to, .. } => Some((*from, *to)),
        TransitionResult::Unchanged { phase } => {
            debug!(%phase, %event, "Phase already reached");
            None
        }
        TransitionResult::InvalidTransition { current, event } => {
            return Err(Error::InvalidTransition(format!(
                "{} is not allowed from phase {}",
                event, current
            )));
        }
    };
    if let Ok(mut guard) = applied.lock() {
        *guard = change;
    }
    result
        .target()
        .ok_or_else(|| Error::InvalidTransition(format!("{} from {}", event, current)))
}

/// Namespace and name of a namespaced object
pub fn object_key<K: Resource>(object: &K) -> Result<(String, String)> {
    let namespace = object
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = object
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    Ok((namespace, name))
}

/// Whether the spec changed since the last create or update finished
pub fn spec_changed(db: &ManagedDatabase) -> bool {
    let observed = db.status.as_ref().and_then(|s| s.observed_generation);
    match (db.metadata.generation, observed) {
        (Some(current), Some(seen)) => current != seen,
        (_, None) => true,
        _ => false,
    }
}

/// Whether a failed database may be created again with its current spec
pub fn failure_retryable(db: &ManagedDatabase) -> bool {
    db.status
        .as_ref()
        .and_then(|s| s.retryable)
        .unwrap_or(true)
}
