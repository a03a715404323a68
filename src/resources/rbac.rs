//! ServiceAccount, Role and RoleBinding for database pods
//!
//! All three share the name `<database>-db`. The Role grants read access to
//! the database's own secret and lets the backup job record Snapshots.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::ManagedDatabase;
use crate::resources::common::{GROUP, rbac_name, standard_labels};

fn metadata(db: &ManagedDatabase) -> ObjectMeta {
    let db_name = db.name_any();
    ObjectMeta {
        name: Some(rbac_name(&db_name)),
        namespace: db.namespace(),
        labels: Some(standard_labels(&db_name)),
        ..Default::default()
    }
}

pub fn generate_service_account(db: &ManagedDatabase) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(db),
        ..Default::default()
    }
}

pub fn generate_role(db: &ManagedDatabase) -> Role {
    Role {
        metadata: metadata(db),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["secrets".to_string()]),
                resource_names: Some(vec![db.secret_name()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            },
            // The backup CronJob records each run as a Snapshot
            PolicyRule {
                api_groups: Some(vec![GROUP.to_string()]),
                resources: Some(vec!["snapshots".to_string(), "snapshots/status".to_string()]),
                verbs: vec!["create".to_string(), "get".to_string(), "patch".to_string()],
                ..Default::default()
            },
        ]),
    }
}

pub fn generate_role_binding(db: &ManagedDatabase) -> RoleBinding {
    let name = rbac_name(&db.name_any());

    RoleBinding {
        metadata: metadata(db),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: db.namespace(),
            ..Default::default()
        }]),
    }
}
