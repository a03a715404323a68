//! Common utilities for Kubernetes resource generation
//!
//! Shared constants, label sets and naming helpers used by every resource
//! generator and by the lifecycle controller.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::ManagedDatabase;

/// API group shared by all custom resources of this operator
pub const GROUP: &str = "managed-db-operator.smoketurner.com";

/// API version for the operator's CRDs
pub const API_VERSION: &str = "managed-db-operator.smoketurner.com/v1alpha1";

/// Kind for ManagedDatabase CRD
pub const KIND: &str = "ManagedDatabase";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "managed-db-operator";

/// Label carrying the database name on every owned object
pub const LABEL_DATABASE_NAME: &str = "managed-db-operator.smoketurner.com/database-name";

/// Label carrying the database kind on every owned object and on dormant records
pub const LABEL_DATABASE_KIND: &str = "managed-db-operator.smoketurner.com/database-kind";

/// Marks a database whose deletion is part of a resume and must not pause it
pub const ANNOTATION_IGNORE: &str = "managed-db-operator.smoketurner.com/ignore";

/// JSON-serialized init spec of a paused database
pub const ANNOTATION_INIT_SPEC: &str = "managed-db-operator.smoketurner.com/init-spec";

/// PostgreSQL port
pub const POSTGRES_PORT: i32 = 5432;

/// Key of the admin password inside the database secret
pub const PASSWORD_KEY: &str = "POSTGRES_PASSWORD";

/// The label pair that scopes destructive cleanup to one database
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSelectorSet {
    pub database_name: String,
    pub database_kind: String,
}

impl LabelSelectorSet {
    pub fn new(database_name: impl Into<String>, database_kind: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            database_kind: database_kind.into(),
        }
    }

    pub fn for_database(db: &ManagedDatabase) -> Self {
        Self::new(db.name_any(), KIND)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_DATABASE_NAME.to_string(), self.database_name.clone()),
            (LABEL_DATABASE_KIND.to_string(), self.database_kind.clone()),
        ])
    }

    /// Selector string accepted by list calls, e.g. `a=b,c=d`
    pub fn to_selector(&self) -> String {
        self.labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether an object's labels carry both selector entries
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels()
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Generate standard labels for all resources belonging to a ManagedDatabase
///
/// Includes the selector set so volume claims created from the StatefulSet
/// template can later be found by WipeOut.
pub fn standard_labels(database_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            database_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "database".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ]);
    labels.extend(LabelSelectorSet::new(database_name, KIND).labels());
    labels
}

/// Labels used to select the pods of one database
pub fn selector_labels(database_name: &str) -> BTreeMap<String, String> {
    LabelSelectorSet::new(database_name, KIND).labels()
}

/// StatefulSet and Service name of a database
pub fn offshoot_name(database_name: &str) -> String {
    database_name.to_string()
}

/// ServiceAccount, Role and RoleBinding name of a database
pub fn rbac_name(database_name: &str) -> String {
    format!("{}-db", database_name)
}
