//! Lifecycle state machine for the operator CR
//!
//! Each call to [`Reconciler::reconcile`] loads the CR fresh and performs at
//! most one step: add the finalizer, move to another state, (re)install the
//! module, or tear it down. Every step is idempotent, so the controller can be
//! invoked any number of times for the same object state.

use std::sync::Arc;
use std::time::Duration;

use btp_manager_core::{BtpOperator, Reason, ReconcilerConfig, State};
use chrono::Utc;
use kube::ResourceExt;

use crate::cluster::Cluster;
use crate::deletion::DeletionOrchestrator;
use crate::error::{KubeError, Result};
use crate::gatekeeper::fetch_credentials;
use crate::installer::{ChartInstaller, InstallRequest};

const INITIALIZED_MESSAGE: &str = "Initialized";
const RETRYING_MESSAGE: &str = "Retrying after error";
const READY_MESSAGE: &str = "Module provisioning succeeded";
const DELETING_MESSAGE: &str = "Being deleted";

/// What a reconcile pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The CR no longer exists
    NotFound,
    /// The finalizer was added; business logic runs on the next pass
    FinalizerAdded,
    /// The CR moved to a new state (or its condition changed)
    Transitioned(State),
    /// The module is applied but not ready yet; nothing was written
    Installing,
    /// Nothing to do
    Unchanged(State),
    /// Teardown finished and the finalizers were released
    Released,
    /// The CR is being deleted and no longer carries our finalizer
    AwaitingRemoval,
}

impl Outcome {
    /// Delay before the next pass, `None` to wait for the next change
    pub fn requeue_after(&self, interval: Duration) -> Option<Duration> {
        match self {
            Outcome::Transitioned(State::Error) | Outcome::Installing => Some(interval),
            _ => None,
        }
    }
}

/// Drives operator CRs through their lifecycle
pub struct Reconciler<C: ?Sized, I: ?Sized> {
    cluster: Arc<C>,
    installer: Arc<I>,
    config: Arc<ReconcilerConfig>,
}

impl<C, I> Reconciler<C, I>
where
    C: Cluster + ?Sized + 'static,
    I: ChartInstaller + ?Sized,
{
    pub fn new(cluster: Arc<C>, installer: Arc<I>, config: ReconcilerConfig) -> Self {
        Self {
            cluster,
            installer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconcile pass for the CR `namespace/name`
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(mut cr) = self.cluster.get_operator(namespace, name).await? else {
            tracing::debug!(namespace, name, "BtpOperator not found");
            return Ok(Outcome::NotFound);
        };

        if cr.is_being_deleted() {
            if !cr.has_finalizer(&self.config.finalizer) {
                return Ok(Outcome::AwaitingRemoval);
            }
            if cr.state() != State::Deleting {
                self.set_status(
                    &mut cr,
                    State::Deleting,
                    Reason::HardDeleting,
                    DELETING_MESSAGE,
                )
                .await?;
                return Ok(Outcome::Transitioned(State::Deleting));
            }
            return self.handle_deleting(cr).await;
        }

        if cr.add_finalizer(&self.config.finalizer) {
            self.cluster.update_operator(&cr).await?;
            tracing::info!(namespace, name, "finalizer added");
            return Ok(Outcome::FinalizerAdded);
        }

        match cr.state() {
            State::Initial => {
                self.set_status(
                    &mut cr,
                    State::Processing,
                    Reason::Initialized,
                    INITIALIZED_MESSAGE,
                )
                .await?;
                Ok(Outcome::Transitioned(State::Processing))
            }
            State::Error | State::Unknown => {
                self.set_status(
                    &mut cr,
                    State::Processing,
                    Reason::Processing,
                    RETRYING_MESSAGE,
                )
                .await?;
                Ok(Outcome::Transitioned(State::Processing))
            }
            State::Processing | State::Ready => self.handle_processing(cr).await,
            State::Deleting => self.handle_deleting(cr).await,
        }
    }

    /// Validate credentials and (re)install the module
    async fn handle_processing(&self, mut cr: BtpOperator) -> Result<Outcome> {
        let credentials = match fetch_credentials(
            self.cluster.as_ref(),
            &self.config.chart_namespace,
            &self.config.secret_name,
        )
        .await
        {
            Ok(credentials) => credentials,
            Err(e @ KubeError::MissingSecret { .. }) => {
                return self.fail(&mut cr, Reason::MissingSecret, &e).await;
            }
            Err(e @ KubeError::InvalidSecret(_)) => {
                return self.fail(&mut cr, Reason::InvalidSecret, &e).await;
            }
            Err(e) => return Err(e),
        };

        let request = InstallRequest::for_operator(&cr, &credentials, &self.config);
        match self.installer.install(&request).await {
            Ok(true) => {
                let changed = self
                    .set_status(&mut cr, State::Ready, Reason::ReconcileSucceeded, READY_MESSAGE)
                    .await?;
                if changed {
                    tracing::info!(name = %cr.name_any(), "module ready");
                    Ok(Outcome::Transitioned(State::Ready))
                } else {
                    Ok(Outcome::Unchanged(State::Ready))
                }
            }
            Ok(false) => {
                tracing::debug!(name = %cr.name_any(), "module not ready yet");
                Ok(Outcome::Installing)
            }
            Err(e) => self.fail(&mut cr, Reason::ChartInstallFailed, &e).await,
        }
    }

    /// Tear the module down and release the CR
    async fn handle_deleting(&self, mut cr: BtpOperator) -> Result<Outcome> {
        let orchestrator =
            DeletionOrchestrator::new(Arc::clone(&self.cluster), Arc::clone(&self.config));

        if let Err(e) = orchestrator.run().await {
            return self.fail(&mut cr, Reason::ResourceRemovalFailed, &e).await;
        }

        // Teardown may take minutes; release the latest version of the object
        let namespace = cr.namespace().unwrap_or_default();
        let Some(mut latest) = self.cluster.get_operator(&namespace, &cr.name_any()).await? else {
            return Ok(Outcome::NotFound);
        };
        latest.clear_finalizers();
        self.cluster.update_operator(&latest).await?;
        tracing::info!(namespace = %namespace, name = %latest.name_any(), "finalizers released");
        Ok(Outcome::Released)
    }

    async fn fail(
        &self,
        cr: &mut BtpOperator,
        reason: Reason,
        error: &KubeError,
    ) -> Result<Outcome> {
        tracing::warn!(name = %cr.name_any(), reason = %reason, error = %error, "reconcile failed");
        self.set_status(cr, State::Error, reason, error.to_string())
            .await?;
        Ok(Outcome::Transitioned(State::Error))
    }

    /// Set state and upsert the condition; skips the write when nothing changed
    async fn set_status(
        &self,
        cr: &mut BtpOperator,
        state: State,
        reason: Reason,
        message: impl Into<String>,
    ) -> Result<bool> {
        let mut status = cr.status.clone().unwrap_or_default();
        status.state = state;
        status
            .conditions
            .upsert(reason.condition(message, cr.metadata.generation, Utc::now()));

        if cr.status.as_ref() == Some(&status) {
            return Ok(false);
        }

        tracing::debug!(name = %cr.name_any(), from = %cr.state(), to = %state, "updating status");
        cr.status = Some(status);
        *cr = self.cluster.update_operator_status(cr).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::dynamic_object;
    use crate::cluster::{Fault, MockCluster};
    use crate::deletion::service_instances;
    use crate::gatekeeper::fixtures::credential_secret;
    use crate::installer::MockInstaller;
    use btp_manager_core::{BtpOperatorSpec, READY_CONDITION};

    const NS: &str = "kyma-system";
    const NAME: &str = "btpoperator";

    struct Fixture {
        cluster: MockCluster,
        installer: MockInstaller,
        reconciler: Reconciler<MockCluster, MockInstaller>,
    }

    fn fixture() -> Fixture {
        let cluster = MockCluster::new();
        let installer = MockInstaller::new();
        let config = ReconcilerConfig {
            hard_delete_timeout: Duration::from_millis(100),
            hard_delete_check_interval: Duration::from_millis(10),
            cleanup_settle_delay: Duration::ZERO,
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::new(
            Arc::new(cluster.clone()),
            Arc::new(installer.clone()),
            config,
        );
        Fixture {
            cluster,
            installer,
            reconciler,
        }
    }

    fn operator(state: Option<State>, finalizer: bool) -> BtpOperator {
        let mut cr = BtpOperator::new(NAME, BtpOperatorSpec::default());
        cr.metadata.namespace = Some(NS.to_string());
        cr.metadata.generation = Some(1);
        if finalizer {
            cr.add_finalizer("custom-deletion-finalizer");
        }
        if let Some(state) = state {
            cr.status = Some(btp_manager_core::BtpOperatorStatus {
                state,
                ..Default::default()
            });
        }
        cr
    }

    fn stored(f: &Fixture) -> BtpOperator {
        f.cluster.operator(NS, NAME).unwrap()
    }

    fn reason(cr: &BtpOperator) -> String {
        cr.status
            .as_ref()
            .and_then(|s| s.conditions.get(READY_CONDITION))
            .map(|c| c.reason.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_cr() {
        let f = fixture();
        assert_eq!(f.reconciler.reconcile(NS, NAME).await.unwrap(), Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_finalizer_added_first() {
        let f = fixture();
        f.cluster.add_operator(operator(None, false));

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::FinalizerAdded);

        let cr = stored(&f);
        assert!(cr.has_finalizer("custom-deletion-finalizer"));
        assert_eq!(cr.state(), State::Initial);
        assert_eq!(f.cluster.operation_counts().status_updates, 0);
    }

    #[tokio::test]
    async fn test_initial_moves_to_processing() {
        let f = fixture();
        f.cluster.add_operator(operator(None, true));

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Transitioned(State::Processing));

        let cr = stored(&f);
        assert_eq!(cr.state(), State::Processing);
        assert_eq!(reason(&cr), "Initialized");
        let condition = cr.status.as_ref().unwrap().conditions.get(READY_CONDITION).unwrap();
        assert_eq!(condition.observed_generation, Some(1));
        assert_eq!(f.installer.calls(), 0);
    }

    #[tokio::test]
    async fn test_processing_without_secret() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Processing), true));

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Transitioned(State::Error));
        assert_eq!(outcome.requeue_after(Duration::from_secs(5)), Some(Duration::from_secs(5)));

        let cr = stored(&f);
        assert_eq!(cr.state(), State::Error);
        assert_eq!(reason(&cr), "MissingSecret");
        assert_eq!(f.installer.calls(), 0);
    }

    #[tokio::test]
    async fn test_processing_with_invalid_secret() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Processing), true));
        let mut secret = credential_secret(NS, "sap-btp-manager");
        if let Some(data) = secret.data.as_mut() {
            data.remove("cluster_id");
        }
        f.cluster.add_secret(secret);

        f.reconciler.reconcile(NS, NAME).await.unwrap();
        let cr = stored(&f);
        assert_eq!(cr.state(), State::Error);
        assert_eq!(reason(&cr), "InvalidSecret");
        let status = cr.status.as_ref().unwrap();
        let message = &status.conditions.get(READY_CONDITION).unwrap().message;
        assert!(message.contains("key cluster_id not found"));
    }

    #[tokio::test]
    async fn test_processing_installs_and_becomes_ready() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Processing), true));
        f.cluster.add_secret(credential_secret(NS, "sap-btp-manager"));

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Transitioned(State::Ready));
        assert_eq!(outcome.requeue_after(Duration::from_secs(5)), None);

        let cr = stored(&f);
        assert_eq!(cr.state(), State::Ready);
        assert_eq!(reason(&cr), "ReconcileSucceeded");
        assert!(cr.status.as_ref().unwrap().conditions.is_true(READY_CONDITION));

        let request = f.installer.last_request().unwrap();
        assert_eq!(request.values["cluster"]["id"], "cluster_id-value");
        assert_eq!(request.namespace, NS);
    }

    #[tokio::test]
    async fn test_ready_pass_is_write_free() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Processing), true));
        f.cluster.add_secret(credential_secret(NS, "sap-btp-manager"));
        f.reconciler.reconcile(NS, NAME).await.unwrap();
        let before = stored(&f);
        f.cluster.reset_counts();

        for _ in 0..3 {
            let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
            assert_eq!(outcome, Outcome::Unchanged(State::Ready));
        }

        let counts = f.cluster.operation_counts();
        assert_eq!(counts.status_updates, 0);
        assert_eq!(counts.updates, 0);
        assert_eq!(stored(&f), before);
    }

    #[tokio::test]
    async fn test_installer_not_ready_writes_nothing() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Processing), true));
        f.cluster.add_secret(credential_secret(NS, "sap-btp-manager"));
        f.installer.set_ready(false);

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Installing);
        assert!(outcome.requeue_after(Duration::from_secs(5)).is_some());
        assert_eq!(stored(&f).state(), State::Processing);
        assert_eq!(f.cluster.operation_counts().status_updates, 0);
    }

    #[tokio::test]
    async fn test_installer_failure_moves_to_error() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Ready), true));
        f.cluster.add_secret(credential_secret(NS, "sap-btp-manager"));
        f.installer.fail_with("rendering failed");

        f.reconciler.reconcile(NS, NAME).await.unwrap();
        let cr = stored(&f);
        assert_eq!(cr.state(), State::Error);
        assert_eq!(reason(&cr), "ChartInstallFailed");
    }

    #[tokio::test]
    async fn test_error_moves_to_processing() {
        for state in [State::Error, State::Unknown] {
            let f = fixture();
            f.cluster.add_operator(operator(Some(state), true));

            let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
            assert_eq!(outcome, Outcome::Transitioned(State::Processing), "from {}", state);
            let cr = stored(&f);
            assert_eq!(cr.state(), State::Processing);
            assert_eq!(reason(&cr), "Processing");
        }
    }

    #[tokio::test]
    async fn test_deletion_takes_priority() {
        for state in [State::Initial, State::Processing, State::Ready, State::Error] {
            let f = fixture();
            f.cluster.add_operator(operator(Some(state), true));
            f.cluster.mark_operator_deleted(NS, NAME);

            let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
            assert_eq!(outcome, Outcome::Transitioned(State::Deleting), "from {}", state);
            let cr = stored(&f);
            assert_eq!(cr.state(), State::Deleting);
            assert_eq!(reason(&cr), "HardDeleting");
            assert_eq!(f.installer.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_deleting_releases_finalizers() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Deleting), true));
        f.cluster.mark_operator_deleted(NS, NAME);

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Released);
        assert!(f.cluster.operator(NS, NAME).is_none());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_finalizer() {
        let f = fixture();
        f.cluster.add_operator(operator(Some(State::Deleting), true));
        f.cluster.mark_operator_deleted(NS, NAME);
        let instances = service_instances();
        f.cluster.add_object(
            &instances,
            dynamic_object(&instances, Some("default"), "si", &["keep"], &[]),
        );
        // Deletes are refused, so the instance outlives the teardown attempt
        f.cluster.set_fault("ServiceInstance", Fault::MethodNotSupported);

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::Transitioned(State::Error));

        let cr = stored(&f);
        assert!(cr.has_finalizer("custom-deletion-finalizer"));
        assert_eq!(reason(&cr), "ResourceRemovalFailed");
    }

    #[tokio::test]
    async fn test_deleted_without_finalizer_is_left_alone() {
        let f = fixture();
        let mut cr = operator(Some(State::Ready), true);
        cr.metadata.finalizers = Some(vec!["other".to_string()]);
        f.cluster.add_operator(cr);
        f.cluster.mark_operator_deleted(NS, NAME);

        let outcome = f.reconciler.reconcile(NS, NAME).await.unwrap();
        assert_eq!(outcome, Outcome::AwaitingRemoval);
        assert_eq!(f.cluster.operation_counts().status_updates, 0);
    }
}
