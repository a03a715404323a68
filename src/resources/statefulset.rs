//! StatefulSet generation for managed databases
//!
//! One StatefulSet per database runs the PostgreSQL image. Its volume claim
//! template carries the database's selector labels so WipeOut can find the
//! claims after the StatefulSet is gone.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretKeySelector, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{ManagedDatabase, ResourceList};
use crate::resources::common::{
    PASSWORD_KEY, POSTGRES_PORT, offshoot_name, rbac_name, selector_labels, standard_labels,
};

/// Name of the volume claim template; claims are named `data-<sts>-<ordinal>`
pub const DATA_VOLUME: &str = "data";

/// Storage requested when the spec leaves it out
const DEFAULT_STORAGE_SIZE: &str = "1Gi";

const PGDATA: &str = "/var/lib/postgresql/data";

/// Name of the volume claim backing a pod of the database
pub fn data_claim_name(database_name: &str, ordinal: i32) -> String {
    format!("{}-{}-{}", DATA_VOLUME, offshoot_name(database_name), ordinal)
}

fn quantities(list: &ResourceList) -> BTreeMap<String, Quantity> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &list.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &list.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    map
}

/// Generate the StatefulSet of a database
///
/// `governing_service` is the headless Service giving pods stable DNS names.
/// The image is `<database_image>:<spec.version>`.
pub fn generate_statefulset(
    db: &ManagedDatabase,
    governing_service: &str,
    database_image: &str,
) -> StatefulSet {
    let db_name = db.name_any();
    let labels = standard_labels(&db_name);
    let secret_name = db.secret_name();

    let env_vars = vec![
        EnvVar {
            name: PASSWORD_KEY.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name,
                    key: PASSWORD_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "PGDATA".to_string(),
            value: Some(format!("{}/pgdata", PGDATA)),
            ..Default::default()
        },
    ];

    let readiness_probe = Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "pg_isready".to_string(),
                "-U".to_string(),
                "postgres".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    };

    let container = Container {
        name: "postgres".to_string(),
        image: Some(format!("{}:{}", database_image, db.spec.version)),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: POSTGRES_PORT,
            name: Some("postgresql".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env_vars),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: PGDATA.to_string(),
            ..Default::default()
        }]),
        resources: db.spec.resources.as_ref().map(|r| ResourceRequirements {
            limits: r.limits.as_ref().map(quantities),
            requests: r.requests.as_ref().map(quantities),
            ..Default::default()
        }),
        readiness_probe: Some(readiness_probe),
        ..Default::default()
    };

    let storage = db.spec.storage.as_ref();
    let pvc_template = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.and_then(|s| s.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(
                        storage
                            .map(|s| s.size.clone())
                            .unwrap_or_else(|| DEFAULT_STORAGE_SIZE.to_string()),
                    ),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(offshoot_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(governing_service.to_string()),
            replicas: Some(db.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&db_name)),
                ..Default::default()
            },
            pod_management_policy: Some("OrderedReady".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(rbac_name(&db_name)),
                    containers: vec![container],
                    node_selector: if db.spec.node_selector.is_empty() {
                        None
                    } else {
                        Some(db.spec.node_selector.clone())
                    },
                    termination_grace_period_seconds: Some(30),
                    security_context: Some(PodSecurityContext {
                        fs_group: Some(999), // postgres group in the official image
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![pvc_template]),
            // Claims outlive the StatefulSet; only WipeOut removes them
            persistent_volume_claim_retention_policy: Some(
                StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Retain".to_string()),
                    when_scaled: Some("Retain".to_string()),
                },
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether every desired replica reports ready
pub fn statefulset_is_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}
