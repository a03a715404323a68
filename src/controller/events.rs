//! Kubernetes Event recording for the lifecycle controllers.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

/// Sink for structured lifecycle events attached to an object
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, object: &ObjectReference, severity: Severity, reason: &str, message: &str);
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    /// The controller name appears as the "reportingComponent" on Events.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, object: &ObjectReference, severity: Severity, reason: &str, message: &str) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Discards every event.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn record(&self, _object: &ObjectReference, _severity: Severity, _reason: &str, _message: &str) {}
}

/// Event reason strings shown in the REASON column of `kubectl get events`.
pub mod reasons {
    pub const SUCCESSFUL_VALIDATE: &str = "SuccessfulValidate";
    pub const FAILED_TO_VALIDATE: &str = "FailedToValidate";
    pub const CREATING: &str = "Creating";
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const FAILED_TO_CREATE: &str = "FailedToCreate";
    pub const FAILED_TO_START: &str = "FailedToStart";
    pub const INITIALIZING: &str = "Initializing";
    pub const SUCCESSFUL_INITIALIZE: &str = "SuccessfulInitialize";
    pub const FAILED_TO_INITIALIZE: &str = "FailedToInitialize";
    pub const SUCCESSFUL_UPDATE: &str = "SuccessfulUpdate";
    pub const FAILED_TO_UPDATE: &str = "FailedToUpdate";
    pub const FAILED_TO_GET: &str = "FailedToGet";
    pub const FAILED_TO_SCHEDULE: &str = "FailedToSchedule";
    pub const FAILED_TO_ADD_MONITOR: &str = "FailedToAddMonitor";
    pub const FAILED_TO_UPDATE_MONITOR: &str = "FailedToUpdateMonitor";
    pub const FAILED_TO_DELETE_MONITOR: &str = "FailedToDeleteMonitor";
    pub const RESUME_REQUESTED: &str = "ResumeRequested";
    pub const IGNORED: &str = "Ignored";
    pub const PAUSING: &str = "Pausing";
    pub const SUCCESSFUL_PAUSE: &str = "SuccessfulPause";
    pub const FAILED_TO_PAUSE: &str = "FailedToPause";
    pub const FAILED_TO_DELETE: &str = "FailedToDelete";
    pub const RESUMING: &str = "Resuming";
    pub const SUCCESSFUL_RESUME: &str = "SuccessfulResume";
    pub const FAILED_TO_RESUME: &str = "FailedToResume";
    pub const WIPING_OUT: &str = "WipingOut";
    pub const SUCCESSFUL_WIPE_OUT: &str = "SuccessfulWipeOut";
    pub const FAILED_TO_WIPE_OUT: &str = "FailedToWipeOut";
}

pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
