//! Prometheus scrape target for a database's metrics exporter
//!
//! Monitoring is a `<name>-stats` Service carrying the standard
//! `prometheus.io/*` annotations, pointing at the exporter port.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec as K8sServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::Api;
use kube::core::ObjectMeta;
use kube::{Client, ResourceExt};

use crate::controller::error::{Error, Result};
use crate::controller::gateway::MonitorGateway;
use crate::crd::{ManagedDatabase, MonitorSpec};
use crate::resources::apply::{apply_resource, delete_resource};
use crate::resources::common::{GROUP, selector_labels, standard_labels};

pub fn stats_service_name(database_name: &str) -> String {
    format!("{}-stats", database_name)
}

pub fn generate_stats_service(db: &ManagedDatabase, monitor: &MonitorSpec) -> Service {
    let db_name = db.name_any();

    let annotations = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), monitor.port.to_string()),
        ("prometheus.io/path".to_string(), "/metrics".to_string()),
        (format!("{}/monitoring-agent", GROUP), monitor.agent.clone()),
    ]);

    let mut labels = standard_labels(&db_name);
    labels.insert("app.kubernetes.io/component".to_string(), "metrics".to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(stats_service_name(&db_name)),
            namespace: db.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            selector: Some(selector_labels(&db_name)),
            ports: Some(vec![ServicePort {
                port: monitor.port,
                target_port: Some(IntOrString::Int(monitor.port)),
                name: Some("metrics".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub struct ServiceMonitorGateway {
    client: Client,
}

impl ServiceMonitorGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, db: &ManagedDatabase) -> Result<Api<Service>> {
        let namespace = db
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

#[async_trait]
impl MonitorGateway for ServiceMonitorGateway {
    async fn add(&self, db: &ManagedDatabase) -> Result<()> {
        let Some(monitor) = &db.spec.monitor else {
            return Ok(());
        };
        apply_resource(&self.api(db)?, &generate_stats_service(db, monitor)).await
    }

    /// Re-apply for the current spec, or remove when monitoring was dropped
    async fn update(&self, db: &ManagedDatabase) -> Result<()> {
        match &db.spec.monitor {
            Some(monitor) => apply_resource(&self.api(db)?, &generate_stats_service(db, monitor)).await,
            None => self.delete(db).await,
        }
    }

    async fn delete(&self, db: &ManagedDatabase) -> Result<()> {
        delete_resource(&self.api(db)?, &stats_service_name(&db.name_any())).await
    }
}
