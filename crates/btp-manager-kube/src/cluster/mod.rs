//! Cluster access used by the reconciler and the deletion orchestrator
//!
//! Every component talks to the API server through the [`Cluster`] trait:
//! - **KubeCluster**: the live driver backed by a `kube::Client`
//! - **MockCluster**: an in-memory driver with finalizer semantics, fault
//!   injection and operation counters, for tests
//!
//! Dependent resources are addressed dynamically by [`ApiResource`] so the
//! orchestrator can work with kinds it only learns about through discovery.

mod live;
mod mock;

pub use live::KubeCluster;
pub use mock::{Fault, MockCluster, OperationCounts, dynamic_object};

use async_trait::async_trait;
use btp_manager_core::BtpOperator;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use crate::error::Result;

/// Cluster operations required by the controller
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fetch an operator CR, `None` when it does not exist
    async fn get_operator(&self, namespace: &str, name: &str) -> Result<Option<BtpOperator>>;

    /// Replace an operator CR's metadata and spec (finalizers included)
    async fn update_operator(&self, operator: &BtpOperator) -> Result<BtpOperator>;

    /// Write the status subresource of an operator CR
    async fn update_operator_status(&self, operator: &BtpOperator) -> Result<BtpOperator>;

    /// Fetch a Secret, `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Delete a Secret; a missing Secret is not an error
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// List objects of a kind, in one namespace or cluster-wide when `namespace` is `None`
    async fn list(&self, resource: &ApiResource, namespace: Option<&str>)
    -> Result<Vec<DynamicObject>>;

    /// Delete a single object
    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
    -> Result<()>;

    /// Delete every object of a kind in a namespace (or cluster-wide), optionally label-scoped
    async fn delete_collection(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<()>;

    /// Strip every finalizer from an object
    async fn remove_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()>;

    /// The server's resource catalog, one list per group/version
    async fn api_resources(&self) -> Result<Vec<APIResourceList>>;
}
