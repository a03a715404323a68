//! One-shot restore jobs that load a Snapshot into a database's first volume
//!
//! The job runs the tools image against the claim `data-<name>-0`, reading
//! object storage credentials from a secret materialized next to it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Secret,
    SecretEnvSource, Volume, VolumeMount,
};
use kube::api::Api;
use kube::core::ObjectMeta;
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::gateway::{JobState, RestoreBackend};
use crate::crd::{ManagedDatabase, Snapshot};
use crate::resources::apply::{apply_resource, create_if_absent, delete_resource};
use crate::resources::common::standard_labels;
use crate::resources::statefulset::data_claim_name;

/// Attempts before a restore job is reported failed
const RESTORE_BACKOFF_LIMIT: i32 = 2;

pub fn credentials_secret_name(database_name: &str) -> String {
    format!("{}-restore-credentials", database_name)
}

pub fn restore_job_name(database_name: &str) -> String {
    format!("{}-restore", database_name)
}

/// Copy the snapshot's storage secret and add the location keys
pub fn generate_credentials_secret(
    db: &ManagedDatabase,
    snapshot: &Snapshot,
    source_data: BTreeMap<String, ByteString>,
) -> Secret {
    let storage = &snapshot.spec.storage;
    let mut string_data = BTreeMap::from([
        ("SNAPSHOT_NAME".to_string(), snapshot.name_any()),
        ("STORAGE_BUCKET".to_string(), storage.bucket.clone()),
        (
            "STORAGE_PREFIX".to_string(),
            storage.prefix.clone().unwrap_or_default(),
        ),
    ]);
    if let Some(endpoint) = &storage.endpoint {
        string_data.insert("STORAGE_ENDPOINT".to_string(), endpoint.clone());
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(credentials_secret_name(&db.name_any())),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db.name_any())),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(source_data),
        string_data: Some(string_data),
        ..Default::default()
    }
}

pub fn generate_restore_job(
    db: &ManagedDatabase,
    snapshot: &Snapshot,
    credentials_secret: &str,
    image: &str,
) -> Job {
    let db_name = db.name_any();
    let labels = standard_labels(&db_name);

    let container = Container {
        name: "restore".to_string(),
        image: Some(image.to_string()),
        args: Some(vec![
            "restore".to_string(),
            "--snapshot".to_string(),
            snapshot.name_any(),
            "--data-dir".to_string(),
            "/var/lib/postgresql/data".to_string(),
        ]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: credentials_secret.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/lib/postgresql/data".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(restore_job_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(RESTORE_BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "data".to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: data_claim_name(&db_name, 0),
                            read_only: Some(false),
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Map a Job's status onto the restore job state
pub fn job_state_of(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Active;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        return JobState::Succeeded;
    }
    let failed_condition = status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "Failed" && c.status == "True");
    if let Some(condition) = failed_condition {
        return JobState::Failed(
            condition
                .message
                .clone()
                .unwrap_or_else(|| "restore job failed".to_string()),
        );
    }
    JobState::Active
}

pub struct JobRestoreBackend {
    client: Client,
    image: String,
}

impl JobRestoreBackend {
    pub fn new(client: Client, image: String) -> Self {
        Self { client, image }
    }
}

#[async_trait]
impl RestoreBackend for JobRestoreBackend {
    async fn materialize_credentials(&self, db: &ManagedDatabase, snapshot: &Snapshot) -> Result<String> {
        let namespace = db
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let snapshot_namespace = snapshot.namespace().unwrap_or_else(|| namespace.clone());
        let source_name = &snapshot.spec.storage.storage_secret_name;

        let source = Api::<Secret>::namespaced(self.client.clone(), &snapshot_namespace)
            .get_opt(source_name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "storage secret {}/{} of snapshot {}",
                    snapshot_namespace,
                    source_name,
                    snapshot.name_any()
                ))
            })?;

        let secret = generate_credentials_secret(db, snapshot, source.data.unwrap_or_default());
        apply_resource(&Api::<Secret>::namespaced(self.client.clone(), &namespace), &secret).await?;
        Ok(secret.name_any())
    }

    async fn create_restore_job(
        &self,
        db: &ManagedDatabase,
        snapshot: &Snapshot,
        credentials_secret: &str,
    ) -> Result<String> {
        let namespace = db
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let job = generate_restore_job(db, snapshot, credentials_secret, &self.image);
        let outcome = create_if_absent(&Api::<Job>::namespaced(self.client.clone(), &namespace), &job).await?;
        debug!(job = %job.name_any(), ?outcome, "Restore job ensured");
        Ok(job.name_any())
    }

    async fn job_state(&self, namespace: &str, job_name: &str) -> Result<JobState> {
        let job = Api::<Job>::namespaced(self.client.clone(), namespace)
            .get_opt(job_name)
            .await?;
        Ok(match job {
            Some(job) => job_state_of(&job),
            None => JobState::Failed(format!("restore job {} disappeared", job_name)),
        })
    }

    async fn cleanup(&self, namespace: &str, job_name: &str, credentials_secret: &str) -> Result<()> {
        if !job_name.is_empty() {
            delete_resource(&Api::<Job>::namespaced(self.client.clone(), namespace), job_name).await?;
        }
        if !credentials_secret.is_empty() {
            delete_resource(
                &Api::<Secret>::namespaced(self.client.clone(), namespace),
                credentials_secret,
            )
            .await?;
        }
        Ok(())
    }
}
