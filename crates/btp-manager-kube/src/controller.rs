//! Controller runtime wiring
//!
//! Connects the [`Reconciler`] to `kube::runtime`: a filtered reflector over
//! every `BtpOperator` in the cluster drives the queue, and changes to the
//! credential Secret fan out to every CR known to the store.

use std::sync::Arc;

use btp_manager_core::{BtpOperator, ReconcilerConfig};
use futures::{StreamExt, TryStreamExt, future};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Client, ResourceExt};

use crate::cluster::{Cluster, KubeCluster};
use crate::error::{KubeError, Result};
use crate::installer::{ChartInstaller, ManifestInstaller};
use crate::reconciler::Reconciler;
use crate::router::{OperatorFilter, SecretFilter};

/// Shared state handed to every reconcile call
pub struct Context<C: ?Sized, I: ?Sized> {
    reconciler: Reconciler<C, I>,
}

impl<C, I> Context<C, I>
where
    C: Cluster + ?Sized + 'static,
    I: ChartInstaller + ?Sized,
{
    pub fn new(reconciler: Reconciler<C, I>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler<C, I> {
        &self.reconciler
    }
}

/// Reconcile one CR and translate the outcome into a requeue decision
pub async fn reconcile<C, I>(cr: Arc<BtpOperator>, ctx: Arc<Context<C, I>>) -> Result<Action>
where
    C: Cluster + ?Sized + 'static,
    I: ChartInstaller + ?Sized,
{
    let namespace = cr.namespace().unwrap_or_default();
    let name = cr.name_any();

    let outcome = ctx.reconciler.reconcile(&namespace, &name).await?;
    tracing::debug!(namespace = %namespace, name = %name, outcome = ?outcome, "reconciled");

    let interval = ctx.reconciler.config().requeue_interval;
    Ok(match outcome.requeue_after(interval) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

/// Requeue after any error the reconciler could not record on the CR itself
pub fn error_policy<C, I>(
    cr: Arc<BtpOperator>,
    error: &KubeError,
    ctx: Arc<Context<C, I>>,
) -> Action
where
    C: Cluster + ?Sized + 'static,
    I: ChartInstaller + ?Sized,
{
    tracing::warn!(name = %cr.name_any(), error = %error, "reconcile error, requeueing");
    Action::requeue(ctx.reconciler.config().requeue_interval)
}

/// Run the controller until SIGINT/SIGTERM
pub async fn run_controller(client: Client, config: ReconcilerConfig) -> Result<()> {
    let operators: Api<BtpOperator> = Api::all(client.clone());
    if let Err(e) = operators.list(&ListParams::default().limit(1)).await {
        tracing::error!(error = %e, "BtpOperator is not queryable, is the CRD installed?");
        return Err(e.into());
    }

    let (store, writer) = reflector::store();
    let mut operator_filter = OperatorFilter::new();
    let operator_stream = reflector(writer, watcher(operators, watcher::Config::default()))
        .default_backoff()
        .try_filter_map(move |event| future::ready(Ok(operator_filter.admit(event))));

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &config.chart_namespace);
    let secret_config =
        watcher::Config::default().fields(&format!("metadata.name={}", config.secret_name));
    let mut secret_filter = SecretFilter::new(&config.chart_namespace, &config.secret_name);
    let secret_stream = watcher(secrets, secret_config)
        .default_backoff()
        .try_filter_map(move |event| future::ready(Ok(secret_filter.admit(event))));

    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let installer = Arc::new(ManifestInstaller::new(client));
    let context = Arc::new(Context::new(Reconciler::new(cluster, installer, config)));

    tracing::info!("starting btp-manager controller");

    let fan_out = store.clone();
    Controller::for_stream(operator_stream, store)
        .watches_stream(secret_stream, move |_secret: Secret| {
            fan_out
                .state()
                .iter()
                .map(|cr| ObjectRef::from_obj(cr.as_ref()))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(
            reconcile::<KubeCluster, ManifestInstaller>,
            error_policy::<KubeCluster, ManifestInstaller>,
            context,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => tracing::trace!(name = %obj.name, "reconcile finished"),
                Err(e) => tracing::warn!(error = %e, "controller error"),
            }
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}
