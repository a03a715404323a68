//! Service generation for managed databases
//!
//! Two kinds of Service exist per namespace:
//! - the governing headless Service shared by every database's StatefulSet
//! - one ClusterIP Service per database routing to its pods

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec as K8sServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::ManagedDatabase;
use crate::resources::common::{
    FIELD_MANAGER, POSTGRES_PORT, offshoot_name, selector_labels, standard_labels,
};

fn postgres_port() -> ServicePort {
    ServicePort {
        port: POSTGRES_PORT,
        target_port: Some(IntOrString::Int(POSTGRES_PORT)),
        name: Some("postgresql".to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the governing headless Service
///
/// StatefulSets of every database in the namespace use it for stable pod DNS,
/// so it selects nothing and carries no per-database labels.
pub fn generate_governing_service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![postgres_port()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the client-facing Service of one database
pub fn generate_database_service(db: &ManagedDatabase) -> Service {
    let db_name = db.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(offshoot_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db_name)),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            selector: Some(selector_labels(&db_name)),
            ports: Some(vec![postgres_port()]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
