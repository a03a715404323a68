//! Additional unit tests for lifecycle phase transitions

use managed_db_operator::controller::state_machine::{
    DatabaseEvent, DatabaseStateMachine, TransitionResult,
};
use managed_db_operator::crd::DatabasePhase;

const ALL_PHASES: [DatabasePhase; 10] = [
    DatabasePhase::Pending,
    DatabasePhase::Creating,
    DatabasePhase::Initializing,
    DatabasePhase::Running,
    DatabasePhase::Pausing,
    DatabasePhase::Paused,
    DatabasePhase::Resuming,
    DatabasePhase::WipingOut,
    DatabasePhase::WipedOut,
    DatabasePhase::Failed,
];

const ALL_EVENTS: [DatabaseEvent; 9] = [
    DatabaseEvent::StartCreate,
    DatabaseEvent::StartInitialize,
    DatabaseEvent::Provisioned,
    DatabaseEvent::Fail,
    DatabaseEvent::StartPause,
    DatabaseEvent::Paused,
    DatabaseEvent::StartResume,
    DatabaseEvent::StartWipeOut,
    DatabaseEvent::WipedOut,
];

fn target(phase: DatabasePhase, event: DatabaseEvent) -> Option<DatabasePhase> {
    DatabaseStateMachine::new().transition(phase, event).target()
}

mod create_cycle_tests {
    use super::*;

    #[test]
    fn test_create_without_init() {
        assert_eq!(
            target(DatabasePhase::Pending, DatabaseEvent::StartCreate),
            Some(DatabasePhase::Creating)
        );
        assert_eq!(
            target(DatabasePhase::Creating, DatabaseEvent::Provisioned),
            Some(DatabasePhase::Running)
        );
    }

    #[test]
    fn test_create_with_init() {
        assert_eq!(
            target(DatabasePhase::Creating, DatabaseEvent::StartInitialize),
            Some(DatabasePhase::Initializing)
        );
        assert_eq!(
            target(DatabasePhase::Initializing, DatabaseEvent::Provisioned),
            Some(DatabasePhase::Running)
        );
    }

    #[test]
    fn test_failed_database_can_retry() {
        assert_eq!(
            target(DatabasePhase::Failed, DatabaseEvent::StartCreate),
            Some(DatabasePhase::Creating)
        );
        assert_eq!(
            target(DatabasePhase::Failed, DatabaseEvent::Provisioned),
            Some(DatabasePhase::Running)
        );
    }

    #[test]
    fn test_running_never_goes_back_to_creating() {
        let sm = DatabaseStateMachine::new();
        assert!(!sm.can_transition(DatabasePhase::Running, DatabaseEvent::StartCreate));
        assert!(matches!(
            sm.transition(DatabasePhase::Running, DatabaseEvent::StartCreate),
            TransitionResult::InvalidTransition {
                current: DatabasePhase::Running,
                event: DatabaseEvent::StartCreate,
            }
        ));
    }

    #[test]
    fn test_running_cannot_initialize() {
        assert_eq!(
            target(DatabasePhase::Running, DatabaseEvent::StartInitialize),
            None
        );
    }
}

mod idempotency_tests {
    use super::*;

    #[test]
    fn test_repeated_events_are_unchanged() {
        let sm = DatabaseStateMachine::new();
        for (phase, event) in [
            (DatabasePhase::Running, DatabaseEvent::Provisioned),
            (DatabasePhase::Failed, DatabaseEvent::Fail),
            (DatabasePhase::Paused, DatabaseEvent::Paused),
            (DatabasePhase::WipedOut, DatabaseEvent::WipedOut),
        ] {
            assert_eq!(
                sm.transition(phase, event),
                TransitionResult::Unchanged { phase },
                "{} on {} should be a no-op",
                event,
                phase
            );
        }
    }

    #[test]
    fn test_unchanged_target_is_current_phase() {
        let result = DatabaseStateMachine::new()
            .transition(DatabasePhase::Pausing, DatabaseEvent::StartPause);
        assert_eq!(result.target(), Some(DatabasePhase::Pausing));
    }

    #[test]
    fn test_success_carries_description() {
        match DatabaseStateMachine::new().transition(DatabasePhase::Paused, DatabaseEvent::StartWipeOut) {
            TransitionResult::Success { to, description, .. } => {
                assert_eq!(to, DatabasePhase::WipingOut);
                assert!(!description.is_empty());
            }
            other => panic!("Expected successful transition, got {:?}", other),
        }
    }
}

mod dormant_lifecycle_tests {
    use super::*;

    #[test]
    fn test_pause_from_every_live_phase() {
        for phase in [
            DatabasePhase::Pending,
            DatabasePhase::Creating,
            DatabasePhase::Initializing,
            DatabasePhase::Running,
            DatabasePhase::Failed,
        ] {
            assert_eq!(
                target(phase, DatabaseEvent::StartPause),
                Some(DatabasePhase::Pausing),
                "pause from {}",
                phase
            );
        }
    }

    #[test]
    fn test_resume_only_from_paused() {
        let sm = DatabaseStateMachine::new();
        for phase in ALL_PHASES {
            let expected = phase == DatabasePhase::Paused;
            assert_eq!(
                sm.can_transition(phase, DatabaseEvent::StartResume),
                expected,
                "resume from {}",
                phase
            );
        }
    }

    #[test]
    fn test_wipe_out_path() {
        assert_eq!(
            target(DatabasePhase::Paused, DatabaseEvent::StartWipeOut),
            Some(DatabasePhase::WipingOut)
        );
        assert_eq!(
            target(DatabasePhase::WipingOut, DatabaseEvent::WipedOut),
            Some(DatabasePhase::WipedOut)
        );
    }

    #[test]
    fn test_wiped_out_is_terminal() {
        let sm = DatabaseStateMachine::new();
        assert!(sm.valid_events(DatabasePhase::WipedOut).is_empty());
        assert_eq!(
            target(DatabasePhase::WipedOut, DatabaseEvent::StartResume),
            None
        );
        assert_eq!(
            target(DatabasePhase::WipedOut, DatabaseEvent::StartCreate),
            None
        );
    }
}

mod valid_events_tests {
    use super::*;

    #[test]
    fn test_valid_events_for_paused() {
        let events = DatabaseStateMachine::new().valid_events(DatabasePhase::Paused);
        assert!(events.contains(&DatabaseEvent::StartResume));
        assert!(events.contains(&DatabaseEvent::StartWipeOut));
        assert!(!events.contains(&DatabaseEvent::StartCreate));
    }

    #[test]
    fn test_valid_events_agree_with_can_transition() {
        let sm = DatabaseStateMachine::new();
        for phase in ALL_PHASES {
            let valid = sm.valid_events(phase);
            for event in ALL_EVENTS {
                assert_eq!(
                    valid.contains(&event),
                    sm.can_transition(phase, event),
                    "{} from {}",
                    event,
                    phase
                );
            }
        }
    }

    #[test]
    fn test_event_display() {
        assert_eq!(DatabaseEvent::StartWipeOut.to_string(), "StartWipeOut");
        assert_eq!(DatabaseEvent::Provisioned.to_string(), "Provisioned");
    }
}
