//! Finite state machine for database lifecycle phases
//!
//! Every phase written by the controller goes through this table, so a
//! create cycle can only move forward (Creating, optionally Initializing,
//! then Running) and a running database can never fall back to Creating.

use std::fmt;

use crate::crd::DatabasePhase;

/// Events that trigger phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEvent {
    /// A create cycle started
    StartCreate,
    /// Snapshot restore started
    StartInitialize,
    /// Workload is up and the create cycle finished
    Provisioned,
    /// The current step failed terminally for this cycle
    Fail,
    /// Deletion observed, database is being paused
    StartPause,
    /// Dormant record observed for the first time
    Paused,
    StartResume,
    StartWipeOut,
    WipedOut,
}

impl fmt::Display for DatabaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatabaseEvent::StartCreate => "StartCreate",
            DatabaseEvent::StartInitialize => "StartInitialize",
            DatabaseEvent::Provisioned => "Provisioned",
            DatabaseEvent::Fail => "Fail",
            DatabaseEvent::StartPause => "StartPause",
            DatabaseEvent::Paused => "Paused",
            DatabaseEvent::StartResume => "StartResume",
            DatabaseEvent::StartWipeOut => "StartWipeOut",
            DatabaseEvent::WipedOut => "WipedOut",
        };
        write!(f, "{}", s)
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: DatabasePhase,
    pub to: DatabasePhase,
    pub event: DatabaseEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: DatabasePhase,
        to: DatabasePhase,
        event: DatabaseEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: DatabasePhase,
        to: DatabasePhase,
        event: DatabaseEvent,
        description: &'static str,
    },
    /// The event's target phase is already the current phase
    Unchanged { phase: DatabasePhase },
    InvalidTransition {
        current: DatabasePhase,
        event: DatabaseEvent,
    },
}

impl TransitionResult {
    /// Target phase for a valid or idempotent transition
    pub fn target(&self) -> Option<DatabasePhase> {
        match self {
            TransitionResult::Success { to, .. } => Some(*to),
            TransitionResult::Unchanged { phase } => Some(*phase),
            TransitionResult::InvalidTransition { .. } => None,
        }
    }
}

/// Lifecycle state machine shared by ManagedDatabase and DormantDatabase
pub struct DatabaseStateMachine {
    transitions: Vec<Transition>,
}

impl Default for DatabaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseStateMachine {
    pub fn new() -> Self {
        use DatabaseEvent as E;
        use DatabasePhase as P;

        Self {
            transitions: vec![
                // === Create cycle ===
                Transition::new(P::Pending, P::Creating, E::StartCreate, "Starting database creation"),
                Transition::new(P::Failed, P::Creating, E::StartCreate, "Retrying database creation"),
                Transition::new(
                    P::Initializing,
                    P::Creating,
                    E::StartCreate,
                    "Restarting an interrupted create cycle",
                ),
                Transition::new(
                    P::Creating,
                    P::Initializing,
                    E::StartInitialize,
                    "Restoring data from snapshot",
                ),
                Transition::new(P::Creating, P::Running, E::Provisioned, "Database is running"),
                Transition::new(
                    P::Initializing,
                    P::Running,
                    E::Provisioned,
                    "Initialization finished, database is running",
                ),
                Transition::new(P::Failed, P::Running, E::Provisioned, "Recovered from failure"),
                // === Failures ===
                Transition::new(P::Creating, P::Failed, E::Fail, "Error during creation"),
                Transition::new(P::Initializing, P::Failed, E::Fail, "Error during initialization"),
                Transition::new(P::Running, P::Failed, E::Fail, "Error while running"),
                Transition::new(P::Resuming, P::Failed, E::Fail, "Error during resume"),
                Transition::new(P::WipingOut, P::Failed, E::Fail, "Error during wipe out"),
                // === Pause ===
                Transition::new(P::Pending, P::Pausing, E::StartPause, "Deleted before creation"),
                Transition::new(P::Creating, P::Pausing, E::StartPause, "Deleted during creation"),
                Transition::new(
                    P::Initializing,
                    P::Pausing,
                    E::StartPause,
                    "Deleted during initialization",
                ),
                Transition::new(P::Running, P::Pausing, E::StartPause, "Deleted, pausing database"),
                Transition::new(P::Failed, P::Pausing, E::StartPause, "Deleted while failed"),
                // === Dormant lifecycle ===
                Transition::new(P::Pending, P::Paused, E::Paused, "Dormant record created"),
                Transition::new(P::Pausing, P::Paused, E::Paused, "Pause completed"),
                Transition::new(P::Paused, P::Resuming, E::StartResume, "Resume requested"),
                Transition::new(P::Paused, P::WipingOut, E::StartWipeOut, "Wipe out requested"),
                Transition::new(
                    P::Failed,
                    P::WipingOut,
                    E::StartWipeOut,
                    "Wipe out requested after failure",
                ),
                Transition::new(P::WipingOut, P::WipedOut, E::WipedOut, "Data wiped out"),
                // WipedOut is terminal
            ],
        }
    }

    /// Resolve the transition for an event from the current phase
    pub fn transition(&self, current: DatabasePhase, event: DatabaseEvent) -> TransitionResult {
        if let Some(t) = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            return TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            };
        }

        // Re-applying an event whose target we are already in is a no-op
        if self
            .transitions
            .iter()
            .any(|t| t.event == event && t.to == current)
        {
            return TransitionResult::Unchanged { phase: current };
        }

        TransitionResult::InvalidTransition { current, event }
    }

    pub fn can_transition(&self, from: DatabasePhase, event: DatabaseEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given phase
    pub fn valid_events(&self, phase: DatabasePhase) -> Vec<DatabaseEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == phase)
            .map(|t| t.event)
            .collect()
    }
}
