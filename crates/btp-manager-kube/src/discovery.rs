//! Discovery of deletable resource kinds
//!
//! Garbage collection cannot rely on a fixed list of kinds: the managed module
//! installs CRDs and its controllers create objects of kinds unknown at build
//! time. The server catalog is queried afresh on every teardown attempt.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;

use crate::cluster::Cluster;
use crate::error::Result;

const DELETE_VERBS: [&str; 2] = ["delete", "deletecollection"];

/// A resource kind the server allows deleting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletableKind {
    pub gvk: GroupVersionKind,
    /// Plural resource name used in API paths
    pub plural: String,
    pub namespaced: bool,
}

impl DeletableKind {
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk, &self.plural)
    }
}

/// Split a `group/version` string; the core group has no slash
fn parse_group_version(group_version: &str) -> (String, String) {
    match group_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), group_version.to_string()),
    }
}

/// Select every kind supporting `delete` or `deletecollection`
///
/// Subresources are skipped and a `(group, kind)` served in several versions is
/// reported once, under the first version listed.
pub fn deletable_kinds_from(catalog: &[APIResourceList]) -> Vec<DeletableKind> {
    let mut seen = HashSet::new();
    let mut kinds = Vec::new();

    for list in catalog {
        let (group, version) = parse_group_version(&list.group_version);
        for resource in &list.resources {
            if resource.name.contains('/') {
                continue;
            }
            if !resource
                .verbs
                .iter()
                .any(|verb| DELETE_VERBS.contains(&verb.as_str()))
            {
                continue;
            }
            if !seen.insert((group.clone(), resource.kind.clone())) {
                continue;
            }
            kinds.push(DeletableKind {
                gvk: GroupVersionKind::gvk(&group, &version, &resource.kind),
                plural: resource.name.clone(),
                namespaced: resource.namespaced,
            });
        }
    }

    kinds
}

/// Query the cluster for deletable kinds
pub async fn deletable_kinds<C: Cluster + ?Sized>(cluster: &C) -> Result<Vec<DeletableKind>> {
    let catalog = cluster.api_resources().await?;
    let kinds = deletable_kinds_from(&catalog);
    tracing::debug!(count = kinds.len(), "discovered deletable kinds");
    Ok(kinds)
}
