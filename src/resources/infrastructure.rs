//! Kubernetes-backed implementation of the database sub-resource gateway

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result};
use crate::controller::gateway::{EnsureOutcome, Infrastructure};
use crate::crd::ManagedDatabase;
use crate::resources::apply::{apply_resource, create_if_absent, delete_resource};
use crate::resources::common::{offshoot_name, rbac_name};
use crate::resources::statefulset::statefulset_is_ready;
use crate::resources::{rbac, secret, service, statefulset};

pub struct KubeInfrastructure {
    client: Client,
    config: OperatorConfig,
}

impl KubeInfrastructure {
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }

    fn api<T>(&self, namespace: &str) -> Api<T>
    where
        T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(db: &ManagedDatabase) -> Result<String> {
    db.namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))
}

#[async_trait]
impl Infrastructure for KubeInfrastructure {
    async fn ensure_governing_service(&self, namespace: &str, name: &str) -> Result<EnsureOutcome> {
        let svc = service::generate_governing_service(namespace, name);
        create_if_absent(&self.api::<Service>(namespace), &svc).await
    }

    async fn ensure_service(&self, db: &ManagedDatabase) -> Result<EnsureOutcome> {
        let ns = namespace_of(db)?;
        let svc = service::generate_database_service(db);
        create_if_absent(&self.api::<Service>(&ns), &svc).await
    }

    async fn ensure_rbac(&self, db: &ManagedDatabase) -> Result<()> {
        let ns = namespace_of(db)?;
        apply_resource(&self.api::<ServiceAccount>(&ns), &rbac::generate_service_account(db)).await?;
        apply_resource(&self.api::<Role>(&ns), &rbac::generate_role(db)).await?;
        apply_resource(&self.api::<RoleBinding>(&ns), &rbac::generate_role_binding(db)).await?;
        Ok(())
    }

    async fn ensure_database_secret(&self, db: &ManagedDatabase) -> Result<EnsureOutcome> {
        let ns = namespace_of(db)?;
        let outcome = create_if_absent(&self.api::<Secret>(&ns), &secret::generate_admin_secret(db)).await?;
        if outcome.created() {
            debug!(secret = %db.secret_name(), "Generated admin credentials");
        }
        Ok(outcome)
    }

    async fn ensure_statefulset(&self, db: &ManagedDatabase) -> Result<EnsureOutcome> {
        let ns = namespace_of(db)?;
        let sts = statefulset::generate_statefulset(
            db,
            &self.config.governing_service,
            &self.config.database_image,
        );
        create_if_absent(&self.api::<StatefulSet>(&ns), &sts).await
    }

    async fn statefulset_ready(&self, db: &ManagedDatabase) -> Result<bool> {
        let ns = namespace_of(db)?;
        let sts = self
            .api::<StatefulSet>(&ns)
            .get_opt(&offshoot_name(&db.name_any()))
            .await?;
        Ok(sts.as_ref().is_some_and(statefulset_is_ready))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<Service>(namespace), name).await
    }

    async fn delete_statefulset(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<StatefulSet>(namespace), name).await
    }

    async fn delete_rbac(&self, namespace: &str, name: &str) -> Result<()> {
        let rbac = rbac_name(name);
        delete_resource(&self.api::<RoleBinding>(namespace), &rbac).await?;
        delete_resource(&self.api::<Role>(namespace), &rbac).await?;
        delete_resource(&self.api::<ServiceAccount>(namespace), &rbac).await
    }
}
