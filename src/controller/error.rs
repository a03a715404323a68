//! Error types for the database lifecycle controllers

use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Optimistic-concurrency write collision reported by a store
    #[error("Write conflict: {0}")]
    ConflictError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Failure creating or deleting a sub-resource
    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),

    /// A bounded wait ran out of time; the resource may still be provisioning
    #[error("Timed out after {elapsed:?} waiting for {what}")]
    TimeoutError { what: String, elapsed: Duration },

    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),
}

fn api_error(err: &Error) -> Option<&kube::error::ErrorResponse> {
    match err {
        Error::KubeError(kube::Error::Api(response)) => Some(response),
        _ => None,
    }
}

impl Error {
    /// True for 404 responses and explicit not-found errors
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            other => api_error(other).is_some_and(|r| r.code == 404),
        }
    }

    /// True when a version-checked write lost against a concurrent writer
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::ConflictError(_) => true,
            other => api_error(other).is_some_and(|r| r.code == 409 && r.reason == "Conflict"),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists(_) => true,
            other => {
                api_error(other).is_some_and(|r| r.code == 409 && r.reason == "AlreadyExists")
            }
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::ValidationError(_) => false,
            Error::InvalidTransition(_) => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::ConflictError(_) => true,
            Error::NotFound(_) => true,
            Error::AlreadyExists(_) => true,
            Error::InfrastructureError(_) => true,
            Error::TimeoutError { .. } => true,
            Error::Cancelled(_) => true,
            Error::FinalizerError(_) => true,
        }
    }

    /// Short machine-friendly label used in events and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::SerializationError(_) => "SerializationError",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::ValidationError(_) => "ValidationError",
            Error::ConflictError(_) => "ConflictError",
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::InfrastructureError(_) => "InfrastructureError",
            Error::TimeoutError { .. } => "TimeoutError",
            Error::Cancelled(_) => "Cancelled",
            Error::InvalidTransition(_) => "InvalidTransition",
            Error::FinalizerError(_) => "FinalizerError",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration for requeueing failed reconciliations
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for the user to change the spec
            self.max_delay
        }
    }
}
