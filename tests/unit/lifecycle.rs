//! Create, update and pause scenarios run through the ManagedDatabase reconciler

use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;

use managed_db_operator::FINALIZER;
use managed_db_operator::controller::events::{Severity, reasons};
use managed_db_operator::controller::gateway::JobState;
use managed_db_operator::controller::matcher::{SPEC_MISMATCH, normalize_spec};
use managed_db_operator::crd::{DatabasePhase, SnapshotPhase};
use managed_db_operator::resources::common::{ANNOTATION_IGNORE, KIND, LABEL_DATABASE_KIND};

use crate::common::*;

const NS: &str = "default";

/// Move the start of the last create attempt into the past
fn age_last_attempt(env: &TestEnv, name: &str, secs: i64) {
    env.store.edit_database(NS, name, |db| {
        if let Some(status) = db.status.as_mut() {
            let started = chrono::Utc::now() - chrono::Duration::seconds(secs);
            status.creation_time = Some(started.to_rfc3339());
        }
    });
}

mod create_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_pass_only_adds_finalizer() {
        let env = TestEnv::new();
        env.submit(&create_test_database("db1", NS)).await;

        let action = env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        let db = env.store.database(NS, "db1").unwrap();
        assert!(db.finalizers().contains(&FINALIZER.to_string()));
        assert_eq!(db.phase(), DatabasePhase::Pending);
        assert!(env.infrastructure.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_without_init_reaches_running() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();

        let db = env.store.database(NS, "db1").unwrap();
        assert_eq!(db.phase(), DatabasePhase::Running);
        let status = db.status.as_ref().unwrap();
        assert_eq!(status.observed_generation, db.metadata.generation);
        assert!(status.creation_time.is_some());

        for call in [
            "ensure_governing_service default/managed-db",
            "ensure_rbac default/db1",
            "ensure_database_secret default/db1",
            "ensure_service default/db1",
            "ensure_statefulset default/db1",
            "statefulset_ready default/db1",
        ] {
            assert!(env.infrastructure.called(call), "missing call: {}", call);
        }
        assert!(env.restore.calls().is_empty());
        assert_eq!(
            env.events.reasons(),
            vec![
                reasons::SUCCESSFUL_VALIDATE,
                reasons::CREATING,
                reasons::SUCCESSFUL_CREATE,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reconcile_of_running_database_is_quiet() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.infrastructure.clear_calls();

        let action = env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert!(env.infrastructure.calls().is_empty());
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_with_init_restores_snapshot() {
        let env = TestEnv::new();
        env.store
            .insert_snapshot(create_test_snapshot("snap1", NS, "origin", SnapshotPhase::Succeeded));

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("snap1")
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert_eq!(
            env.restore.calls(),
            vec![
                "credentials snap1".to_string(),
                "job snap1".to_string(),
                "cleanup db1-restore db1-restore-credentials".to_string(),
            ]
        );
        assert!(env.events.has(reasons::INITIALIZING));
        assert!(env.events.has(reasons::SUCCESSFUL_INITIALIZE));
        assert!(!env.events.has(reasons::FAILED_TO_INITIALIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restore_job_does_not_fail_create() {
        let env = TestEnv::new();
        env.store
            .insert_snapshot(create_test_snapshot("snap1", NS, "origin", SnapshotPhase::Succeeded));
        env.restore.finish_with(JobState::Failed("exit code 1".to_string()));

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("snap1")
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        let event = env.events.find(reasons::FAILED_TO_INITIALIZE).unwrap();
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.message.contains("exit code 1"));
        // Job and credentials are removed even after a failure
        assert!(
            env.restore
                .calls()
                .contains(&"cleanup db1-restore db1-restore-credentials".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_job_that_never_finishes_times_out() {
        let env = TestEnv::new();
        env.store
            .insert_snapshot(create_test_snapshot("snap1", NS, "origin", SnapshotPhase::Succeeded));
        env.restore.finish_with(JobState::Active);

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("snap1")
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        let event = env.events.find(reasons::FAILED_TO_INITIALIZE).unwrap();
        assert!(event.message.contains("did not finish"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_snapshot_skips_restore_job() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("missing")
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert!(env.restore.calls().is_empty());
        let event = env.events.find(reasons::FAILED_TO_INITIALIZE).unwrap();
        assert!(event.message.contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_not_succeeded_skips_restore_job() {
        let env = TestEnv::new();
        env.store
            .insert_snapshot(create_test_snapshot("snap1", NS, "origin", SnapshotPhase::Running));

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("snap1")
            .build();
        env.provision(&db).await.unwrap();

        assert!(env.restore.calls().is_empty());
        assert!(env.events.has(reasons::FAILED_TO_INITIALIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_spec_fails_without_side_effects() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS).with_replicas(0).build();

        let err = env.provision(&db).await.unwrap_err();

        assert!(matches!(err, managed_db_operator::Error::ValidationError(_)));
        let stored = env.store.database(NS, "db1").unwrap();
        assert_eq!(stored.phase(), DatabasePhase::Failed);
        assert!(stored.status.unwrap().reason.unwrap().contains("replica count"));
        assert!(env.infrastructure.calls().is_empty());
        assert!(env.events.has(reasons::FAILED_TO_VALIDATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_fails_create() {
        let env = TestEnv::new();
        env.infrastructure.set_ready(false);

        let err = env
            .provision(&create_test_database("db1", NS))
            .await
            .unwrap_err();

        assert!(matches!(err, managed_db_operator::Error::TimeoutError { .. }));
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Failed);
        assert!(env.events.has(reasons::FAILED_TO_START));
        assert!(!env.events.has(reasons::SUCCESSFUL_CREATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_readiness_timeout_waits_and_restores() {
        let env = TestEnv::new();
        env.store
            .insert_snapshot(create_test_snapshot("snap1", NS, "origin", SnapshotPhase::Succeeded));
        env.infrastructure.set_ready(false);

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_init_snapshot("snap1")
            .build();
        let err = env.provision(&db).await.unwrap_err();
        assert!(matches!(err, managed_db_operator::Error::TimeoutError { .. }));
        assert!(env.restore.calls().is_empty());
        assert!(env.infrastructure.has_statefulset(NS, "db1"));

        // Same spec, StatefulSet already present: pods are still awaited
        env.infrastructure.clear_calls();
        age_last_attempt(&env, "db1", 120);
        let err = env.reconcile_database(NS, "db1").await.unwrap_err();
        assert!(matches!(err, managed_db_operator::Error::TimeoutError { .. }));
        assert!(env.infrastructure.called("statefulset_ready default/db1"));
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Failed);

        env.infrastructure.set_ready(true);
        age_last_attempt(&env, "db1", 120);
        env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert!(env.restore.calls().contains(&"job snap1".to_string()));
        assert!(env.events.has(reasons::SUCCESSFUL_CREATE));
        assert!(env.events.has(reasons::SUCCESSFUL_INITIALIZE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_waits_for_spec_change() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS).with_replicas(0).build();
        env.provision(&db).await.unwrap_err();
        let stored = env.store.database(NS, "db1").unwrap();
        assert_eq!(stored.status.unwrap().retryable, Some(false));

        age_last_attempt(&env, "db1", 120);
        let action = env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::await_change());
        let validate_failures = env
            .events
            .all()
            .iter()
            .filter(|e| e.reason == reasons::FAILED_TO_VALIDATE)
            .count();
        assert_eq!(validate_failures, 1);

        env.store.edit_database(NS, "db1", |db| db.spec.replicas = 1);
        env.reconcile_database(NS, "db1").await.unwrap();

        let db = env.store.database(NS, "db1").unwrap();
        assert_eq!(db.phase(), DatabasePhase::Running);
        assert_eq!(db.status.unwrap().retryable, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_create_is_retried_with_unchanged_spec() {
        let env = TestEnv::new();
        env.infrastructure.set_ready(false);
        env.provision(&create_test_database("db1", NS)).await.unwrap_err();
        let stored = env.store.database(NS, "db1").unwrap();
        assert_eq!(stored.status.unwrap().retryable, Some(true));

        env.infrastructure.set_ready(true);
        age_last_attempt(&env, "db1", 120);
        env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statefulset_failure_fails_create() {
        let env = TestEnv::new();
        env.infrastructure.fail_statefulset(true);

        assert!(env.provision(&create_test_database("db1", NS)).await.is_err());
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Failed);
        let event = env.events.find(reasons::FAILED_TO_CREATE).unwrap();
        assert!(event.message.contains("StatefulSet"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_database_waits_until_spec_changes() {
        let env = TestEnv::new();
        env.infrastructure.set_ready(false);
        assert!(env.provision(&create_test_database("db1", NS)).await.is_err());
        env.infrastructure.clear_calls();

        // Unchanged spec: no new attempt yet
        let action = env.reconcile_database(NS, "db1").await.unwrap();
        assert_ne!(action, Action::await_change());
        assert!(env.infrastructure.calls().is_empty());

        env.infrastructure.set_ready(true);
        env.store.edit_database(NS, "db1", |db| db.spec.replicas = 2);
        env.reconcile_database(NS, "db1").await.unwrap();

        let db = env.store.database(NS, "db1").unwrap();
        assert_eq!(db.phase(), DatabasePhase::Running);
        assert_eq!(db.status.unwrap().observed_generation, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_failure_is_advisory() {
        let env = TestEnv::new();
        env.monitor.fail(true);

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_monitor("prometheus", 9187)
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert_eq!(env.monitor.calls(), vec!["add db1".to_string()]);
        assert!(env.events.has(reasons::FAILED_TO_ADD_MONITOR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_schedule_applied_and_failure_is_advisory() {
        let env = TestEnv::new();
        env.backup.fail(true);

        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_backup_schedule("0 2 * * *")
            .build();
        env.provision(&db).await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert_eq!(env.backup.calls(), vec!["schedule db1 0 2 * * *".to_string()]);
        assert!(env.events.has(reasons::FAILED_TO_SCHEDULE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_writes_survive_conflicts() {
        let env = TestEnv::new();
        env.submit(&create_test_database("db1", NS)).await;
        env.reconcile_database(NS, "db1").await.unwrap();

        env.store.inject_conflicts(3);
        env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_conflicts_surface_as_conflict_error() {
        let env = TestEnv::new();
        env.submit(&create_test_database("db1", NS)).await;

        env.store.inject_conflicts(100);
        let err = env.reconcile_database(NS, "db1").await.unwrap_err();

        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }
}

mod update_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_adding_monitor_to_running_database() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();

        env.store.edit_database(NS, "db1", |db| {
            db.spec.monitor = Some(managed_db_operator::crd::MonitorSpec {
                agent: "prometheus".to_string(),
                port: 9187,
            });
        });
        env.reconcile_database(NS, "db1").await.unwrap();

        let db = env.store.database(NS, "db1").unwrap();
        assert_eq!(db.phase(), DatabasePhase::Running);
        assert_eq!(db.status.unwrap().observed_generation, Some(2));
        assert_eq!(env.monitor.calls(), vec!["add db1".to_string()]);
        assert!(env.events.has(reasons::SUCCESSFUL_UPDATE));

        // Settled: another pass does not touch the monitor again
        env.reconcile_database(NS, "db1").await.unwrap();
        assert_eq!(env.monitor.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removing_monitor_deletes_it() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_monitor("prometheus", 9187)
            .build();
        env.provision(&db).await.unwrap();

        env.store.edit_database(NS, "db1", |db| db.spec.monitor = None);
        env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(
            env.monitor.calls(),
            vec!["add db1".to_string(), "delete db1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_changing_schedule_reschedules_backup() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_backup_schedule("0 2 * * *")
            .build();
        env.provision(&db).await.unwrap();

        env.store.edit_database(NS, "db1", |db| {
            if let Some(schedule) = db.spec.backup_schedule.as_mut() {
                schedule.cron_expression = "@daily".to_string();
            }
        });
        env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(
            env.backup.calls(),
            vec![
                "schedule db1 0 2 * * *".to_string(),
                "schedule db1 @daily".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_change_leaves_existing_statefulset_alone() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_storage("10Gi", None)
            .build();
        env.provision(&db).await.unwrap();
        env.infrastructure.clear_calls();

        env.store.edit_database(NS, "db1", |db| {
            db.spec.storage = Some(managed_db_operator::crd::StorageSpec {
                storage_class: Some("fast".to_string()),
                size: "50Gi".to_string(),
            });
        });
        env.reconcile_database(NS, "db1").await.unwrap();

        let db = env.store.database(NS, "db1").unwrap();
        assert_eq!(db.phase(), DatabasePhase::Running);
        assert_eq!(db.status.unwrap().observed_generation, Some(2));
        assert!(env.infrastructure.called("ensure_statefulset default/db1"));
        assert!(!env.infrastructure.called("statefulset_ready default/db1"));
        assert!(env.events.has(reasons::SUCCESSFUL_UPDATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_update_keeps_database_running() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();

        env.store.edit_database(NS, "db1", |db| db.spec.replicas = 0);
        let err = env.reconcile_database(NS, "db1").await.unwrap_err();

        assert!(matches!(err, managed_db_operator::Error::ValidationError(_)));
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
        assert!(env.events.has(reasons::FAILED_TO_UPDATE));
    }
}

mod pause_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delete_pauses_into_dormant_record() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_label("team", "core")
            .with_backup_schedule("@daily")
            .with_monitor("prometheus", 9187)
            .build();
        env.provision(&db).await.unwrap();

        let action = env.delete_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(env.store.database(NS, "db1").is_none());

        let dormant = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(dormant.labels().get(LABEL_DATABASE_KIND), Some(&KIND.to_string()));
        assert_eq!(dormant.spec.origin.spec, normalize_spec("db1", &db.spec));
        assert_eq!(dormant.spec.origin.metadata.labels.get("team"), Some(&"core".to_string()));
        assert!(!dormant.spec.resume);
        assert!(!dormant.spec.wipe_out);

        for call in [
            "delete_service default/db1",
            "delete_statefulset default/db1",
            "delete_rbac default/db1",
        ] {
            assert!(env.infrastructure.called(call), "missing call: {}", call);
        }
        assert!(env.backup.calls().contains(&"stop db1".to_string()));
        assert!(env.monitor.calls().contains(&"delete db1".to_string()));
        assert!(env.events.has(reasons::PAUSING));
        assert!(env.events.has(reasons::SUCCESSFUL_PAUSE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_database_is_recreated() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS).locked().build();
        env.provision(&db).await.unwrap();
        env.infrastructure.clear_calls();

        env.delete_database(NS, "db1").await.unwrap();

        let recreated = env.store.database(NS, "db1").unwrap();
        assert!(recreated.metadata.deletion_timestamp.is_none());
        assert!(recreated.spec.do_not_pause);
        assert!(recreated.status.is_none());
        assert!(env.store.dormant(NS, "db1").is_none());
        assert!(!env.infrastructure.called("delete_statefulset default/db1"));

        let event = env.events.find(reasons::FAILED_TO_PAUSE).unwrap();
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.message.contains("is locked."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dormant_write_failure_aborts_pause() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.infrastructure.clear_calls();
        env.store.fail_dormant_creates(true);

        env.delete_database(NS, "db1").await.unwrap();

        assert!(env.store.database(NS, "db1").is_none());
        assert!(env.store.dormant(NS, "db1").is_none());
        // Nothing else was torn down
        assert!(env.infrastructure.calls().is_empty());
        assert!(env.events.has(reasons::FAILED_TO_PAUSE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_teardown_keeps_finalizer_until_retry() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.infrastructure.fail_deletes(true);

        let err = env.delete_database(NS, "db1").await.unwrap_err();

        assert!(matches!(err, managed_db_operator::Error::InfrastructureError(_)));
        let held = env.store.database(NS, "db1").unwrap();
        assert!(held.metadata.deletion_timestamp.is_some());
        assert!(held.finalizers().contains(&FINALIZER.to_string()));
        assert!(env.store.dormant(NS, "db1").is_some());
        let failures: Vec<_> = env
            .events
            .all()
            .into_iter()
            .filter(|e| e.reason == reasons::FAILED_TO_DELETE)
            .collect();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().any(|e| e.message.contains("StatefulSet")));
        assert!(!env.events.has(reasons::SUCCESSFUL_PAUSE));

        // The dormant record from the first pass is reused
        env.infrastructure.fail_deletes(false);
        env.reconcile_database(NS, "db1").await.unwrap();

        assert!(env.store.database(NS, "db1").is_none());
        assert!(env.store.dormant(NS, "db1").is_some());
        assert!(env.events.has(reasons::SUCCESSFUL_PAUSE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_held_by_foreign_finalizer_is_left_alone() {
        let env = TestEnv::new();
        let db = ManagedDatabaseBuilder::new("db1", NS)
            .with_finalizer("example.com/protect")
            .build();
        env.submit(&db).await;

        let action = env.delete_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::await_change());
        let stored = env.store.database(NS, "db1").unwrap();
        assert!(stored.metadata.deletion_timestamp.is_some());
        assert!(env.store.dormant(NS, "db1").is_none());
        assert!(env.events.all().is_empty());
    }
}

mod resume_request_tests {
    use super::*;

    async fn paused(env: &TestEnv) {
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.delete_database(NS, "db1").await.unwrap();
        env.settle_dormant(NS, "db1").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_create_requests_resume() {
        let env = TestEnv::new();
        paused(&env).await;
        env.submit(&create_test_database("db1", NS)).await;
        env.reconcile_database(NS, "db1").await.unwrap();

        let action = env.reconcile_database(NS, "db1").await.unwrap();

        assert_eq!(action, Action::await_change());
        let pending = env.store.database(NS, "db1").unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());
        assert!(pending.annotations().contains_key(ANNOTATION_IGNORE));
        assert!(env.store.dormant(NS, "db1").unwrap().spec.resume);
        assert!(env.events.has(reasons::RESUME_REQUESTED));

        // The deletion that follows is not a pause
        env.reconcile_database(NS, "db1").await.unwrap();
        assert!(env.store.database(NS, "db1").is_none());
        assert!(env.events.has(reasons::IGNORED));
        assert_eq!(
            env.events
                .all()
                .iter()
                .filter(|e| e.reason == reasons::PAUSING)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_against_origin_with_init_is_kept() {
        let env = TestEnv::new();
        paused(&env).await;
        env.store.edit_dormant(NS, "db1", |d| {
            d.spec.origin.spec.init = Some(managed_db_operator::crd::InitSpec {
                snapshot_source: None,
            });
        });

        let err = env
            .provision(&create_test_database("db1", NS))
            .await
            .unwrap_err();

        assert!(err.to_string().contains(SPEC_MISMATCH));
        let stored = env.store.database(NS, "db1").unwrap();
        assert!(stored.metadata.deletion_timestamp.is_none());
        assert!(!stored.annotations().contains_key(ANNOTATION_IGNORE));
        assert!(!env.store.dormant(NS, "db1").unwrap().spec.resume);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatching_create_is_rejected() {
        let env = TestEnv::new();
        paused(&env).await;

        let different = ManagedDatabaseBuilder::new("db1", NS).with_version("17.0").build();
        let err = env.provision(&different).await.unwrap_err();

        assert!(matches!(err, managed_db_operator::Error::ValidationError(_)));
        assert!(err.to_string().contains("mismatches"));
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Failed);
        assert!(!env.store.dormant(NS, "db1").unwrap().spec.resume);
        assert!(env.events.has(reasons::FAILED_TO_CREATE));
    }
}
