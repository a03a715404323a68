pub mod context;
pub mod dormant;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lifecycle;
pub mod matcher;
pub mod reconciler;
pub mod restore;
pub mod retry;
pub mod state_machine;
pub mod status;
pub mod validation;
pub mod wait;

pub use context::{CONTROLLER_NAME, Context, Gateways};
pub use dormant::DORMANT_FINALIZER;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{FINALIZER, dormant_error_policy, error_policy, reconcile, reconcile_dormant};
pub use state_machine::{DatabaseEvent, DatabaseStateMachine, TransitionResult};
pub use status::{StatusReporter, spec_changed};
pub use validation::{MAX_REPLICAS, MIN_REPLICAS, SpecValidator, validate_spec};
