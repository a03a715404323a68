//! Validation rules for ManagedDatabase specs
//!
//! Rules cover the fields the operator turns into infrastructure:
//! - Version and replica count
//! - Storage size format
//! - Backup schedule and its storage target
//! - Init snapshot reference
//! - Monitor port

use async_trait::async_trait;

use crate::controller::error::{Error, Result};
use crate::controller::gateway::Validator;
use crate::crd::{BackupScheduleSpec, ManagedDatabase, ManagedDatabaseSpec, StorageSpec};

/// Minimum number of replicas
pub const MIN_REPLICAS: i32 = 1;

/// Maximum number of replicas (arbitrary limit for safety)
pub const MAX_REPLICAS: i32 = 100;

/// Cron macros accepted in place of a five-field expression
const CRON_MACROS: &[&str] = &[
    "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
];

/// Rule-based validator used by the running operator
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecValidator;

#[async_trait]
impl Validator for SpecValidator {
    async fn validate(&self, db: &ManagedDatabase) -> Result<()> {
        validate_spec(&db.spec)
    }
}

/// Validate a database spec
pub fn validate_spec(spec: &ManagedDatabaseSpec) -> Result<()> {
    if spec.version.trim().is_empty() {
        return Err(Error::ValidationError("version must be set".to_string()));
    }
    validate_replicas(spec.replicas)?;
    if let Some(storage) = &spec.storage {
        validate_storage(storage)?;
    }
    if let Some(schedule) = &spec.backup_schedule {
        validate_backup_schedule(schedule)?;
    }
    if let Some(source) = spec.init.as_ref().and_then(|i| i.snapshot_source.as_ref())
        && source.name.trim().is_empty()
    {
        return Err(Error::ValidationError(
            "init.snapshotSource.name must be set".to_string(),
        ));
    }
    if let Some(monitor) = &spec.monitor
        && !(1..=65535).contains(&monitor.port)
    {
        return Err(Error::ValidationError(format!(
            "monitor port {} is out of range",
            monitor.port
        )));
    }
    Ok(())
}

fn validate_replicas(replicas: i32) -> Result<()> {
    if replicas < MIN_REPLICAS {
        return Err(Error::ValidationError(format!(
            "replica count {} is below minimum {}",
            replicas, MIN_REPLICAS
        )));
    }

    if replicas > MAX_REPLICAS {
        return Err(Error::ValidationError(format!(
            "replica count {} exceeds maximum {}",
            replicas, MAX_REPLICAS
        )));
    }

    Ok(())
}

fn validate_storage(storage: &StorageSpec) -> Result<()> {
    let size = &storage.size;

    // Validate size format (e.g., "10Gi", "512Mi")
    if !size.ends_with("Gi") && !size.ends_with("Mi") && !size.ends_with("Ti") {
        return Err(Error::ValidationError(format!(
            "storage size must end with Gi, Mi, or Ti: {}",
            size
        )));
    }

    let num_str = size.trim_end_matches(char::is_alphabetic);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::ValidationError(format!("invalid storage size number: {}", size)))?;
    if num == 0 {
        return Err(Error::ValidationError(format!(
            "storage size must be positive: {}",
            size
        )));
    }

    Ok(())
}

fn validate_backup_schedule(schedule: &BackupScheduleSpec) -> Result<()> {
    let expr = schedule.cron_expression.trim();
    let valid_cron = if expr.starts_with('@') {
        CRON_MACROS.contains(&expr)
    } else {
        expr.split_whitespace().count() == 5
    };
    if !valid_cron {
        return Err(Error::ValidationError(format!(
            "invalid cron expression: {:?}",
            schedule.cron_expression
        )));
    }
    if schedule.storage.bucket.trim().is_empty() {
        return Err(Error::ValidationError(
            "backupSchedule.storage.bucket must be set".to_string(),
        ));
    }
    if schedule.storage.storage_secret_name.trim().is_empty() {
        return Err(Error::ValidationError(
            "backupSchedule.storage.storageSecretName must be set".to_string(),
        ));
    }
    Ok(())
}
