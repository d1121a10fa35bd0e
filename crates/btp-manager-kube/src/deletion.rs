//! Two-phase teardown of the managed module
//!
//! Teardown runs in this order:
//! 1. Snapshot the namespace set
//! 2. Pre-delete the workload Deployment and the owned webhook configurations
//! 3. Hard delete: bulk-delete the static dependent kinds and wait for their
//!    own finalizers to complete, bounded by `hardDeleteTimeout`
//! 4. Soft delete when the hard delete failed or ran out of time: strip
//!    finalizers from every remaining dependent
//! 5. Garbage collection: delete everything carrying the ownership label across
//!    every discovered deletable kind
//!
//! A failed attempt leaves the operator's finalizer in place; the next
//! reconcile starts again from step 1.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use btp_manager_core::ReconcilerConfig;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use tokio::sync::oneshot;

use crate::cluster::Cluster;
use crate::discovery::deletable_kinds;
use crate::error::{KubeError, Result};

/// API group of the dependent service resources
pub const SERVICES_GROUP: &str = "services.cloud.sap.com";

pub fn service_instances() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(SERVICES_GROUP, "v1", "ServiceInstance"),
        "serviceinstances",
    )
}

/// Bindings own a Secret of the same namespace/name holding the binding credentials
pub fn service_bindings() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(SERVICES_GROUP, "v1", "ServiceBinding"),
        "servicebindings",
    )
}

/// How the dependent resources were removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPath {
    /// Dependents disappeared on their own after the bulk delete
    HardDelete,
    /// The bulk delete failed; finalizers were stripped
    SoftAfterFailure,
    /// The dependents did not disappear in time; finalizers were stripped
    SoftAfterTimeout,
}

impl fmt::Display for TeardownPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownPath::HardDelete => f.write_str("hard delete"),
            TeardownPath::SoftAfterFailure => f.write_str("soft delete after hard delete failure"),
            TeardownPath::SoftAfterTimeout => f.write_str("soft delete after hard delete timeout"),
        }
    }
}

/// Summary of a successful teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub path: TeardownPath,
    /// Namespaces in the snapshot taken at the start of the attempt
    pub namespaces: usize,
    /// Deletable kinds swept by garbage collection
    pub kinds_collected: usize,
}

/// Result of racing the hard delete against its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HardDeleteOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Treat "already gone" and "cannot be deleted" answers as success
fn ignore_gone(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_ignorable_on_delete() => {
            tracing::trace!(error = %e, "ignoring delete error");
            Ok(())
        }
        other => other,
    }
}

/// Background hard-delete task
///
/// Owns everything it needs so it can outlive an abandoned teardown attempt.
struct HardDelete<C: ?Sized> {
    cluster: Arc<C>,
    namespaces: Vec<String>,
    check_interval: Duration,
}

impl<C: Cluster + ?Sized> HardDelete<C> {
    async fn run(self, mut result: oneshot::Sender<bool>) {
        if let Some(succeeded) = self.execute(&mut result).await {
            // Nobody is listening once the deadline has passed
            let _ = result.send(succeeded);
        }
    }

    /// `None` when the receiver went away while polling
    async fn execute(&self, result: &mut oneshot::Sender<bool>) -> Option<bool> {
        for resource in [service_bindings(), service_instances()] {
            for namespace in &self.namespaces {
                let outcome = self
                    .cluster
                    .delete_collection(&resource, Some(namespace), None)
                    .await;
                if let Err(e) = ignore_gone(outcome) {
                    tracing::warn!(
                        kind = %resource.kind,
                        namespace = %namespace,
                        error = %e,
                        "hard delete failed"
                    );
                    return Some(false);
                }
            }
        }

        loop {
            match self.remaining().await {
                Ok(0) => return Some(true),
                Ok(remaining) => {
                    tracing::debug!(remaining, "waiting for dependent resources to be removed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "checking for remaining dependent resources failed");
                    return Some(false);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = result.closed() => {
                    tracing::debug!("hard delete abandoned");
                    return None;
                }
            }
        }
    }

    /// Count dependent resources still present in the snapshotted namespaces
    async fn remaining(&self) -> Result<usize> {
        let mut count = 0;
        for resource in [service_instances(), service_bindings()] {
            for namespace in &self.namespaces {
                match self.cluster.list(&resource, Some(namespace)).await {
                    Ok(items) => count += items.len(),
                    Err(e) if e.is_not_found() || e.is_no_match() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(count)
    }
}

/// Runs teardown attempts against a cluster
pub struct DeletionOrchestrator<C: ?Sized> {
    cluster: Arc<C>,
    config: Arc<ReconcilerConfig>,
}

impl<C: Cluster + ?Sized + 'static> DeletionOrchestrator<C> {
    pub fn new(cluster: Arc<C>, config: Arc<ReconcilerConfig>) -> Self {
        Self { cluster, config }
    }

    /// Run one full teardown attempt
    pub async fn run(&self) -> Result<TeardownReport> {
        let namespaces = self.cluster.list_namespaces().await?;
        tracing::info!(namespaces = namespaces.len(), "starting teardown");

        self.pre_delete().await?;

        let path = match self.race_hard_delete(namespaces.clone()).await {
            HardDeleteOutcome::Succeeded => TeardownPath::HardDelete,
            HardDeleteOutcome::Failed => {
                tracing::info!("hard delete failed, performing soft delete");
                self.soft_delete().await?;
                TeardownPath::SoftAfterFailure
            }
            HardDeleteOutcome::TimedOut => {
                tracing::info!(
                    timeout = ?self.config.hard_delete_timeout,
                    "hard delete timed out, performing soft delete"
                );
                self.soft_delete().await?;
                TeardownPath::SoftAfterTimeout
            }
        };

        let kinds_collected = self.collect_garbage(&namespaces).await?;

        let report = TeardownReport {
            path,
            namespaces: namespaces.len(),
            kinds_collected,
        };
        tracing::info!(path = %report.path, kinds = kinds_collected, "teardown finished");
        Ok(report)
    }

    /// Remove the workload and its admission webhooks before touching dependents
    async fn pre_delete(&self) -> Result<()> {
        let deployments = ApiResource::erase::<Deployment>(&());
        ignore_gone(
            self.cluster
                .delete(
                    &deployments,
                    Some(&self.config.chart_namespace),
                    &self.config.deployment_name,
                )
                .await,
        )?;

        let selector = self.config.ownership_label.selector();
        for resource in [
            ApiResource::erase::<MutatingWebhookConfiguration>(&()),
            ApiResource::erase::<ValidatingWebhookConfiguration>(&()),
        ] {
            ignore_gone(
                self.cluster
                    .delete_collection(&resource, None, Some(&selector))
                    .await,
            )?;
        }

        Ok(())
    }

    async fn race_hard_delete(&self, namespaces: Vec<String>) -> HardDeleteOutcome {
        let (tx, rx) = oneshot::channel();
        let task = HardDelete {
            cluster: Arc::clone(&self.cluster),
            namespaces,
            check_interval: self.config.hard_delete_check_interval,
        };
        tokio::spawn(task.run(tx));

        match tokio::time::timeout(self.config.hard_delete_timeout, rx).await {
            Ok(Ok(true)) => HardDeleteOutcome::Succeeded,
            Ok(Ok(false)) => HardDeleteOutcome::Failed,
            // The task ended without reporting (it panicked)
            Ok(Err(_)) => HardDeleteOutcome::Failed,
            Err(_) => HardDeleteOutcome::TimedOut,
        }
    }

    /// Strip finalizers from every instance, then every binding
    async fn soft_delete(&self) -> Result<()> {
        self.soft_delete_kind(&service_instances(), false).await?;
        self.soft_delete_kind(&service_bindings(), true).await
    }

    async fn soft_delete_kind(&self, resource: &ApiResource, owns_secret: bool) -> Result<()> {
        let Some(items) = self.list_all(resource).await? else {
            return Ok(());
        };

        for item in &items {
            let namespace = item.namespace();
            let name = item.name_any();

            if let Err(e) = self
                .cluster
                .remove_finalizers(resource, namespace.as_deref(), &name)
                .await
            {
                if !e.is_not_found() {
                    return Err(e);
                }
            }
            ignore_gone(self.cluster.delete(resource, namespace.as_deref(), &name).await)?;

            if owns_secret {
                if let Some(namespace) = &namespace {
                    self.cluster.delete_secret(namespace, &name).await?;
                }
            }
        }

        let remaining = self.list_all(resource).await?.unwrap_or_default();
        if !remaining.is_empty() {
            return Err(KubeError::SoftDeleteIncomplete {
                kind: resource.kind.clone(),
                remaining: remaining.len(),
            });
        }

        tracing::debug!(kind = %resource.kind, removed = items.len(), "soft delete finished");
        Ok(())
    }

    /// Cluster-wide list; `None` when the kind is not served
    async fn list_all(
        &self,
        resource: &ApiResource,
    ) -> Result<Option<Vec<kube::api::DynamicObject>>> {
        match self.cluster.list(resource, None).await {
            Ok(items) => Ok(Some(items)),
            Err(e) if e.is_not_found() || e.is_no_match() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete every labelled object of every deletable kind
    async fn collect_garbage(&self, namespaces: &[String]) -> Result<usize> {
        if !self.config.cleanup_settle_delay.is_zero() {
            tokio::time::sleep(self.config.cleanup_settle_delay).await;
        }

        let kinds = deletable_kinds(self.cluster.as_ref()).await?;
        let selector = self.config.ownership_label.selector();

        for kind in &kinds {
            let resource = kind.api_resource();
            if kind.namespaced {
                for namespace in namespaces {
                    ignore_gone(
                        self.cluster
                            .delete_collection(&resource, Some(namespace), Some(&selector))
                            .await,
                    )?;
                }
            } else {
                ignore_gone(
                    self.cluster
                        .delete_collection(&resource, None, Some(&selector))
                        .await,
                )?;
            }
        }

        Ok(kinds.len())
    }
}
