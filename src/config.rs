//! Operator configuration loaded from environment variables
//!
//! Every setting has a default. Values are populated from the deployment's
//! environment (typically a ConfigMap referenced with `envFrom`).

use std::time::Duration;

use thiserror::Error;

use crate::controller::retry::RetryConfig;

/// Fixed upper bound for one snapshot restore
pub const RESTORE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Operator-wide settings
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches cluster-wide
    pub watch_namespace: Option<String>,
    /// Name of the shared headless Service giving pods stable DNS names
    pub governing_service: String,
    /// Bound on the wait for a newly created StatefulSet's pods
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub restore_timeout: Duration,
    pub restore_poll_interval: Duration,
    /// Image repository for database pods; the tag comes from the spec version
    pub database_image: String,
    /// Image used by restore jobs
    pub restore_image: String,
    /// Image used by scheduled backup jobs
    pub backup_image: String,
    /// Conflict retries for status and metadata writes
    pub status_retry: RetryConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            governing_service: "managed-db".to_string(),
            readiness_timeout: Duration::from_secs(300),
            readiness_poll_interval: Duration::from_secs(5),
            restore_timeout: RESTORE_TIMEOUT,
            restore_poll_interval: Duration::from_secs(10),
            database_image: "postgres".to_string(),
            restore_image: "ghcr.io/smoketurner/managed-db-tools:latest".to_string(),
            backup_image: "ghcr.io/smoketurner/managed-db-tools:latest".to_string(),
            status_retry: RetryConfig::conflict_default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut status_retry = defaults.status_retry.clone();
        if let Some(attempts) = parse_u64(&lookup, "STATUS_RETRY_ATTEMPTS")? {
            status_retry.max_attempts = positive("STATUS_RETRY_ATTEMPTS", attempts)? as u32;
        }

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            governing_service: non_empty("GOVERNING_SERVICE").unwrap_or(defaults.governing_service),
            readiness_timeout: secs(&lookup, "READINESS_TIMEOUT_SECS")?
                .unwrap_or(defaults.readiness_timeout),
            readiness_poll_interval: secs(&lookup, "READINESS_POLL_SECS")?
                .unwrap_or(defaults.readiness_poll_interval),
            restore_timeout: RESTORE_TIMEOUT,
            restore_poll_interval: secs(&lookup, "RESTORE_POLL_SECS")?
                .unwrap_or(defaults.restore_poll_interval),
            database_image: non_empty("DATABASE_IMAGE").unwrap_or(defaults.database_image),
            restore_image: non_empty("RESTORE_IMAGE").unwrap_or(defaults.restore_image),
            backup_image: non_empty("BACKUP_IMAGE").unwrap_or(defaults.backup_image),
            status_retry,
        })
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn positive(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn secs<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_u64(lookup, key)? {
        Some(value) => Ok(Some(Duration::from_secs(positive(key, value)?))),
        None => Ok(None),
    }
}
