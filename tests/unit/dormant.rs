//! Dormant record scenarios: marking paused, resume and wipe out

use kube::ResourceExt;

use managed_db_operator::DORMANT_FINALIZER;
use managed_db_operator::controller::dormant::{DormantAction, next_dormant_action};
use managed_db_operator::controller::events::reasons;
use managed_db_operator::controller::gateway::DatabaseStore;
use managed_db_operator::controller::matcher::normalize_spec;
use managed_db_operator::crd::{DatabasePhase, SnapshotPhase};
use managed_db_operator::resources::common::ANNOTATION_IGNORE;
use managed_db_operator::resources::standard_labels;

use crate::common::*;

const NS: &str = "default";

/// Provision `db`, delete it and let its dormant record settle in Paused
async fn pause(env: &TestEnv, db: &managed_db_operator::ManagedDatabase) {
    env.provision(db).await.unwrap();
    env.delete_database(NS, &db.name_any()).await.unwrap();
    env.settle_dormant(NS, &db.name_any()).await;
}

mod mark_paused_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_record_gets_finalizer_then_paused() {
        let env = TestEnv::new();
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.delete_database(NS, "db1").await.unwrap();

        let fresh = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(next_dormant_action(&fresh), DormantAction::MarkPaused);
        assert!(fresh.finalizers().is_empty());

        env.reconcile_dormant(NS, "db1").await.unwrap();
        let held = env.store.dormant(NS, "db1").unwrap();
        assert!(held.finalizers().contains(&DORMANT_FINALIZER.to_string()));

        env.reconcile_dormant(NS, "db1").await.unwrap();
        let paused = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(paused.phase(), DatabasePhase::Paused);
        assert!(paused.status.unwrap().pausing_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_record_is_idle() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        let before = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(next_dormant_action(&before), DormantAction::Idle);
        env.reconcile_dormant(NS, "db1").await.unwrap();
        let after = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_deletion_releases_record() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        env.ctx.store.delete_dormant(NS, "db1").await.unwrap();
        assert!(env.store.dormant(NS, "db1").unwrap().metadata.deletion_timestamp.is_some());

        env.reconcile_dormant(NS, "db1").await.unwrap();
        assert!(env.store.dormant(NS, "db1").is_none());
        assert!(env.store.database(NS, "db1").is_none());
    }
}

mod resume_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_create_pause_resume_round_trip() {
        let env = TestEnv::new();
        let original = ManagedDatabaseBuilder::new("db1", NS)
            .with_replicas(2)
            .with_storage("5Gi", Some("fast"))
            .with_label("team", "core")
            .build();
        pause(&env, &original).await;

        env.store.edit_dormant(NS, "db1", |d| d.spec.resume = true);
        env.reconcile_dormant(NS, "db1").await.unwrap();

        let resuming = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(resuming.phase(), DatabasePhase::Resuming);
        assert!(resuming.metadata.deletion_timestamp.is_some());
        assert!(env.events.has(reasons::RESUMING));

        env.reconcile_dormant(NS, "db1").await.unwrap();
        assert!(env.store.dormant(NS, "db1").is_none());

        let resumed = env.store.database(NS, "db1").unwrap();
        assert_eq!(resumed.spec, normalize_spec("db1", &original.spec));
        assert_eq!(resumed.labels().get("team"), Some(&"core".to_string()));
        assert!(resumed.status.is_none());
        assert!(env.events.has(reasons::SUCCESSFUL_RESUME));

        // The recreated database goes through a normal create
        env.reconcile_database(NS, "db1").await.unwrap();
        env.reconcile_database(NS, "db1").await.unwrap();
        assert_eq!(env.store.database(NS, "db1").unwrap().phase(), DatabasePhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_matching_create_request() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        // Same database submitted again
        env.provision(&create_test_database("db1", NS)).await.unwrap();
        env.reconcile_database(NS, "db1").await.unwrap();
        assert!(env.store.database(NS, "db1").is_none());

        env.settle_dormant(NS, "db1").await;

        assert!(env.store.dormant(NS, "db1").is_none());
        let resumed = env.store.database(NS, "db1").unwrap();
        assert!(resumed.metadata.deletion_timestamp.is_none());
        assert_eq!(
            resumed.spec.database_secret.unwrap().secret_name,
            "db1-admin-auth"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_waits_for_ignored_request_to_go() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        env.provision(&create_test_database("db1", NS)).await.unwrap();
        let ignored = env.store.database(NS, "db1").unwrap();
        assert!(ignored.metadata.deletion_timestamp.is_some());

        // The record is handled before the ignored deletion
        env.reconcile_dormant(NS, "db1").await.unwrap();
        let err = env.reconcile_dormant(NS, "db1").await.unwrap_err();

        assert!(err.is_retryable());
        let held = env.store.dormant(NS, "db1").unwrap();
        assert!(held.metadata.deletion_timestamp.is_some());
        assert!(held.finalizers().contains(&DORMANT_FINALIZER.to_string()));

        env.reconcile_database(NS, "db1").await.unwrap();
        assert!(env.store.database(NS, "db1").is_none());

        env.reconcile_dormant(NS, "db1").await.unwrap();

        assert!(env.store.dormant(NS, "db1").is_none());
        let resumed = env.store.database(NS, "db1").unwrap();
        assert!(resumed.metadata.deletion_timestamp.is_none());
        assert!(!resumed.annotations().contains_key(ANNOTATION_IGNORE));
        assert!(env.events.has(reasons::SUCCESSFUL_RESUME));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_blocked_when_origin_has_init() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        env.store.edit_dormant(NS, "db1", |d| {
            d.spec.resume = true;
            d.spec.origin.spec.init = Some(managed_db_operator::crd::InitSpec {
                snapshot_source: None,
            });
        });
        env.reconcile_dormant(NS, "db1").await.unwrap();

        let dormant = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(dormant.phase(), DatabasePhase::Paused);
        assert!(!dormant.spec.resume);
        assert!(dormant.status.unwrap().reason.is_some());
        assert!(env.store.database(NS, "db1").is_none());
        assert!(env.events.has(reasons::FAILED_TO_RESUME));
    }
}

mod wipe_out_tests {
    use super::*;

    fn seed_data(env: &TestEnv) {
        env.store
            .insert_snapshot(create_test_snapshot("db1-a", NS, "db1", SnapshotPhase::Succeeded));
        env.store
            .insert_snapshot(create_test_snapshot("db1-b", NS, "db1", SnapshotPhase::Failed));
        env.store
            .insert_snapshot(create_test_snapshot("db2-a", NS, "db2", SnapshotPhase::Succeeded));
        env.store.insert_claim(NS, "data-db1-0", standard_labels("db1"));
        env.store.insert_claim(NS, "data-db1-1", standard_labels("db1"));
        env.store.insert_claim(NS, "data-db2-0", standard_labels("db2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wipe_out_deletes_only_matching_data() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;
        seed_data(&env);

        env.store.edit_dormant(NS, "db1", |d| d.spec.wipe_out = true);
        env.reconcile_dormant(NS, "db1").await.unwrap();

        let dormant = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(dormant.phase(), DatabasePhase::WipedOut);
        assert!(dormant.status.unwrap().wipe_out_time.is_some());
        assert_eq!(env.store.snapshot_names(NS), vec!["db2-a".to_string()]);
        assert_eq!(env.store.claim_names(NS), vec!["data-db2-0".to_string()]);

        let event = env.events.find(reasons::SUCCESSFUL_WIPE_OUT).unwrap();
        assert!(event.message.contains("2 snapshots"));
        assert!(event.message.contains("2 volume claims"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wipe_out_is_idempotent() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;
        seed_data(&env);
        env.store.edit_dormant(NS, "db1", |d| d.spec.wipe_out = true);
        env.reconcile_dormant(NS, "db1").await.unwrap();

        let before = env.store.dormant(NS, "db1").unwrap();
        env.reconcile_dormant(NS, "db1").await.unwrap();
        let after = env.store.dormant(NS, "db1").unwrap();

        assert_eq!(after.phase(), DatabasePhase::WipedOut);
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
        assert_eq!(env.store.snapshot_names(NS), vec!["db2-a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wipe_out_takes_priority_over_resume() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;

        env.store.edit_dormant(NS, "db1", |d| {
            d.spec.wipe_out = true;
            d.spec.resume = true;
        });
        env.reconcile_dormant(NS, "db1").await.unwrap();

        assert_eq!(
            env.store.dormant(NS, "db1").unwrap().phase(),
            DatabasePhase::WipedOut
        );
        assert!(env.store.database(NS, "db1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wiped_out_record_rejects_resume() {
        let env = TestEnv::new();
        pause(&env, &create_test_database("db1", NS)).await;
        env.store.edit_dormant(NS, "db1", |d| d.spec.wipe_out = true);
        env.reconcile_dormant(NS, "db1").await.unwrap();

        env.store.edit_dormant(NS, "db1", |d| d.spec.resume = true);
        env.reconcile_dormant(NS, "db1").await.unwrap();

        let dormant = env.store.dormant(NS, "db1").unwrap();
        assert_eq!(dormant.phase(), DatabasePhase::WipedOut);
        assert!(!dormant.spec.resume);
        assert_eq!(dormant.status.unwrap().reason.as_deref(), Some("wiped out"));
        assert!(env.store.database(NS, "db1").is_none());
        assert!(env.events.has(reasons::FAILED_TO_RESUME));
    }
}
