//! Scheduled backups as a CronJob per database
//!
//! Each run dumps the database to object storage and records a Snapshot
//! labeled with the database's selector set, which is what WipeOut deletes.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretEnvSource,
    SecretKeySelector,
};
use kube::api::Api;
use kube::core::ObjectMeta;
use kube::{Client, ResourceExt};

use crate::controller::error::{Error, Result};
use crate::controller::gateway::BackupScheduler;
use crate::crd::{BackupScheduleSpec, ManagedDatabase};
use crate::resources::apply::{apply_resource, delete_resource};
use crate::resources::common::{
    LabelSelectorSet, PASSWORD_KEY, offshoot_name, rbac_name, standard_labels,
};

pub fn backup_cronjob_name(database_name: &str) -> String {
    format!("{}-backup", database_name)
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub fn generate_backup_cronjob(db: &ManagedDatabase, schedule: &BackupScheduleSpec, image: &str) -> CronJob {
    let db_name = db.name_any();
    let labels = standard_labels(&db_name);
    let storage = &schedule.storage;

    let mut env_vars = vec![
        env("DATABASE_NAME", db_name.clone()),
        env("DATABASE_HOST", offshoot_name(&db_name)),
        env("SNAPSHOT_LABELS", LabelSelectorSet::for_database(db).to_selector()),
        env("STORAGE_BUCKET", storage.bucket.clone()),
        env("STORAGE_PREFIX", storage.prefix.clone().unwrap_or_default()),
        env("STORAGE_SECRET_NAME", storage.storage_secret_name.clone()),
        EnvVar {
            name: "PGPASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: db.secret_name(),
                    key: PASSWORD_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(endpoint) = &storage.endpoint {
        env_vars.push(env("STORAGE_ENDPOINT", endpoint.clone()));
    }

    let container = Container {
        name: "backup".to_string(),
        image: Some(image.to_string()),
        args: Some(vec!["backup".to_string()]),
        env: Some(env_vars),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: storage.storage_secret_name.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    CronJob {
        metadata: ObjectMeta {
            name: Some(backup_cronjob_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.cron_expression.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(1),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(1),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            service_account_name: Some(rbac_name(&db_name)),
                            restart_policy: Some("Never".to_string()),
                            containers: vec![container],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct CronJobBackupScheduler {
    client: Client,
    image: String,
}

impl CronJobBackupScheduler {
    pub fn new(client: Client, image: String) -> Self {
        Self { client, image }
    }
}

#[async_trait]
impl BackupScheduler for CronJobBackupScheduler {
    async fn schedule(&self, db: &ManagedDatabase, schedule: &BackupScheduleSpec) -> Result<()> {
        let namespace = db
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let cronjob = generate_backup_cronjob(db, schedule, &self.image);
        apply_resource(&Api::<CronJob>::namespaced(self.client.clone(), &namespace), &cronjob).await
    }

    async fn stop(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(
            &Api::<CronJob>::namespaced(self.client.clone(), namespace),
            &backup_cronjob_name(name),
        )
        .await
    }
}
