//! Server-side apply and tolerant delete helpers shared by the kube gateways

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::Result;
use crate::controller::gateway::EnsureOutcome;
use crate::resources::common::FIELD_MANAGER;

/// Apply a namespaced resource using server-side apply
pub async fn apply_resource<T>(api: &Api<T>, resource: &T) -> Result<()>
where
    T: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Clone + Debug,
    <T as Resource>::DynamicType: Default,
{
    let name = resource.name_any();
    let patch = Patch::Apply(resource);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    api.patch(&name, &params, &patch).await?;
    debug!("Applied {}: {}", T::kind(&Default::default()), name);

    Ok(())
}

/// Create a resource only if no object of that name exists. An existing
/// object is left untouched, including fields the API server treats as
/// immutable.
pub async fn create_if_absent<T>(api: &Api<T>, resource: &T) -> Result<EnsureOutcome>
where
    T: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Clone + Debug,
    <T as Resource>::DynamicType: Default,
{
    if api.get_opt(&resource.name_any()).await?.is_some() {
        return Ok(EnsureOutcome::Existing);
    }
    match api.create(&Default::default(), resource).await {
        Ok(_) => Ok(EnsureOutcome::Created),
        // Lost a race with another writer; the object is there either way
        Err(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Ok(EnsureOutcome::Existing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete a resource, treating an absent object as already deleted
pub async fn delete_resource<T>(api: &Api<T>, name: &str) -> Result<()>
where
    T: Resource<Scope = NamespaceResourceScope> + DeserializeOwned + Clone + Debug,
    <T as Resource>::DynamicType: Default,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            debug!("Deleted {}: {}", T::kind(&Default::default()), name);
            Ok(())
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
