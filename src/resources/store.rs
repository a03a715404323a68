//! Kubernetes-backed store for the operator's custom resources
//!
//! Writes are optimistic: `replace` sends the resourceVersion that was read
//! and the API server answers 409 Conflict when the object moved on. Status
//! writes use a merge patch that carries the same resourceVersion, which the
//! server checks the same way.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::controller::error::{Error, Result};
use crate::controller::gateway::DatabaseStore;
use crate::crd::{DormantDatabase, ManagedDatabase, Snapshot};
use crate::resources::apply::delete_resource;
use crate::resources::common::LabelSelectorSet;

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn key<K: Resource>(object: &K) -> Result<(String, String)> {
    let namespace = object
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = object
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    Ok((namespace, name))
}

/// Copy of `object` suitable for a create call
fn for_create<K: Resource + Clone>(object: &K) -> K {
    let mut fresh = object.clone();
    let meta = fresh.meta_mut();
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.generation = None;
    meta.managed_fields = None;
    fresh
}

async fn create<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    Ok(api.create(&PostParams::default(), &for_create(object)).await?)
}

async fn replace<K>(api: &Api<K>, object: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let (_, name) = key(object)?;
    Ok(api.replace(&name, &PostParams::default(), object).await?)
}

/// Version-checked write of the status subresource
async fn replace_status<K, S>(api: &Api<K>, object: &K, status: &S) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let (_, name) = key(object)?;
    let patch = json!({
        "metadata": { "resourceVersion": object.meta().resource_version },
        "status": status,
    });
    Ok(api
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

async fn list_names<K>(api: &Api<K>, selector: &LabelSelectorSet) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api
        .list(&ListParams::default().labels(&selector.to_selector()))
        .await?;
    Ok(list.items.iter().map(|item| item.name_any()).collect())
}

#[async_trait]
impl DatabaseStore for KubeStore {
    async fn get_database(&self, namespace: &str, name: &str) -> Result<Option<ManagedDatabase>> {
        Ok(self.api::<ManagedDatabase>(namespace).get_opt(name).await?)
    }

    async fn create_database(&self, db: &ManagedDatabase) -> Result<ManagedDatabase> {
        let (namespace, _) = key(db)?;
        create(&self.api(&namespace), db).await
    }

    async fn replace_database(&self, db: &ManagedDatabase) -> Result<ManagedDatabase> {
        let (namespace, _) = key(db)?;
        replace(&self.api(&namespace), db).await
    }

    async fn replace_database_status(&self, db: &ManagedDatabase) -> Result<ManagedDatabase> {
        let (namespace, _) = key(db)?;
        replace_status(&self.api(&namespace), db, &db.status).await
    }

    async fn delete_database(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<ManagedDatabase>(namespace), name).await
    }

    async fn get_dormant(&self, namespace: &str, name: &str) -> Result<Option<DormantDatabase>> {
        Ok(self.api::<DormantDatabase>(namespace).get_opt(name).await?)
    }

    async fn create_dormant(&self, dormant: &DormantDatabase) -> Result<DormantDatabase> {
        let (namespace, _) = key(dormant)?;
        create(&self.api(&namespace), dormant).await
    }

    async fn replace_dormant(&self, dormant: &DormantDatabase) -> Result<DormantDatabase> {
        let (namespace, _) = key(dormant)?;
        replace(&self.api(&namespace), dormant).await
    }

    async fn replace_dormant_status(&self, dormant: &DormantDatabase) -> Result<DormantDatabase> {
        let (namespace, _) = key(dormant)?;
        replace_status(&self.api(&namespace), dormant, &dormant.status).await
    }

    async fn delete_dormant(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<DormantDatabase>(namespace), name).await
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>> {
        Ok(self.api::<Snapshot>(namespace).get_opt(name).await?)
    }

    async fn list_snapshots(&self, namespace: &str, selector: &LabelSelectorSet) -> Result<Vec<String>> {
        list_names(&self.api::<Snapshot>(namespace), selector).await
    }

    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<Snapshot>(namespace), name).await
    }

    async fn list_volume_claims(
        &self,
        namespace: &str,
        selector: &LabelSelectorSet,
    ) -> Result<Vec<String>> {
        list_names(&self.api::<PersistentVolumeClaim>(namespace), selector).await
    }

    async fn delete_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        delete_resource(&self.api::<PersistentVolumeClaim>(namespace), name).await
    }
}
