//! Live cluster driver backed by a `kube::Client`

use async_trait::async_trait;
use btp_manager_core::BtpOperator;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroup, APIResourceList};
use kube::{
    Client, ResourceExt,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::ApiResource,
};
use serde_json::json;

use super::Cluster;
use crate::error::{KubeError, Result};

/// [`Cluster`] implementation talking to a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn operator_api(&self, operator: &BtpOperator) -> Result<(Api<BtpOperator>, String)> {
        let namespace = operator.namespace().ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "BtpOperator {} has no namespace",
                operator.name_any()
            ))
        })?;
        Ok((
            Api::namespaced(self.client.clone(), &namespace),
            operator.name_any(),
        ))
    }

    fn dynamic_api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    /// Group versions to query for one API group, preferred version first
    fn group_versions(group: &APIGroup) -> Vec<String> {
        let mut versions = Vec::with_capacity(group.versions.len());
        if let Some(preferred) = &group.preferred_version {
            versions.push(preferred.group_version.clone());
        }
        for version in &group.versions {
            if !versions.contains(&version.group_version) {
                versions.push(version.group_version.clone());
            }
        }
        versions
    }
}

fn background() -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(kube::api::PropagationPolicy::Background),
        ..Default::default()
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_operator(&self, namespace: &str, name: &str) -> Result<Option<BtpOperator>> {
        let api: Api<BtpOperator> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_operator(&self, operator: &BtpOperator) -> Result<BtpOperator> {
        let (api, name) = self.operator_api(operator)?;
        Ok(api.replace(&name, &PostParams::default(), operator).await?)
    }

    async fn update_operator_status(&self, operator: &BtpOperator) -> Result<BtpOperator> {
        let (api, name) = self.operator_api(operator)?;
        let patch = json!({ "status": operator.status });
        Ok(api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.dynamic_api(resource, namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let api = self.dynamic_api(resource, namespace);
        api.delete(name, &background()).await?;
        Ok(())
    }

    async fn delete_collection(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<()> {
        let api = self.dynamic_api(resource, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        api.delete_collection(&background(), &params).await?;
        Ok(())
    }

    async fn remove_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let api = self.dynamic_api(resource, namespace);
        let patch = json!({ "metadata": { "finalizers": null } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn api_resources(&self) -> Result<Vec<APIResourceList>> {
        let mut lists = Vec::new();

        let core = self.client.list_core_api_versions().await?;
        for version in &core.versions {
            lists.push(self.client.list_core_api_resources(version).await?);
        }

        let groups = self.client.list_api_groups().await?;
        for group in &groups.groups {
            for group_version in Self::group_versions(group) {
                // Aggregated APIs may be unavailable; skip them like kubectl does
                match self.client.list_api_group_resources(&group_version).await {
                    Ok(list) => lists.push(list),
                    Err(e) => {
                        tracing::warn!(
                            group_version = %group_version,
                            error = %e,
                            "skipping unavailable API group version"
                        );
                    }
                }
            }
        }

        Ok(lists)
    }
}
