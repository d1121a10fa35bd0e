//! End-to-end lifecycle of a BtpOperator against the in-memory cluster

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use btp_manager_core::{BtpOperator, BtpOperatorSpec, READY_CONDITION, ReconcilerConfig, State};
use btp_manager_kube::deletion::{service_bindings, service_instances};
use btp_manager_kube::{
    DeletionOrchestrator, Fault, MockCluster, MockInstaller, Outcome, Reconciler, TeardownPath,
    dynamic_object,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use kube::api::ObjectMeta;
use kube::discovery::ApiResource;

const NS: &str = "kyma-system";
const NAME: &str = "btpoperator";
const MANAGED_BY: (&str, &str) = ("app.kubernetes.io/managed-by", "btp-manager");

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        hard_delete_timeout: Duration::from_millis(200),
        hard_delete_check_interval: Duration::from_millis(20),
        cleanup_settle_delay: Duration::ZERO,
        ..ReconcilerConfig::default()
    }
}

fn operator() -> BtpOperator {
    let mut cr = BtpOperator::new(NAME, BtpOperatorSpec::default());
    cr.metadata.namespace = Some(NS.to_string());
    cr.metadata.generation = Some(1);
    cr
}

fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

fn credentials() -> Secret {
    secret(
        NS,
        "sap-btp-manager",
        &[
            ("clientid", "my-client"),
            ("clientsecret", "s3cr3t"),
            ("sm_url", "https://service-manager.example.com"),
            ("tokenurl", "https://auth.example.com"),
            ("cluster_id", "cluster-1"),
        ],
    )
}

fn configmaps() -> ApiResource {
    ApiResource::erase::<ConfigMap>(&())
}

fn catalog() -> Vec<APIResourceList> {
    vec![APIResourceList {
        group_version: "v1".to_string(),
        resources: vec![APIResource {
            name: "configmaps".to_string(),
            kind: "ConfigMap".to_string(),
            namespaced: true,
            verbs: ["get", "list", "delete", "deletecollection"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
            ..Default::default()
        }],
    }]
}

fn ready_reason(cluster: &MockCluster) -> String {
    cluster
        .operator(NS, NAME)
        .and_then(|cr| cr.status)
        .and_then(|s| s.conditions.get(READY_CONDITION).map(|c| c.reason.clone()))
        .unwrap_or_default()
}

/// An instance and a binding (with its credentials Secret) stuck on finalizers,
/// plus one owned and one foreign ConfigMap
fn add_stuck_dependents(cluster: &MockCluster) {
    let finalizer = ["services.cloud.sap.com/sap-btp-finalizer"];
    let instance = dynamic_object(&service_instances(), Some("default"), "db", &finalizer, &[]);
    cluster.add_object(&service_instances(), instance);
    let binding =
        dynamic_object(&service_bindings(), Some("default"), "db-binding", &finalizer, &[]);
    cluster.add_object(&service_bindings(), binding);
    cluster.add_secret(secret("default", "db-binding", &[("password", "x")]));
    cluster.add_object(
        &configmaps(),
        dynamic_object(&configmaps(), Some(NS), "module-config", &[], &[MANAGED_BY]),
    );
    cluster.add_object(
        &configmaps(),
        dynamic_object(&configmaps(), Some(NS), "user-config", &[], &[]),
    );
}

fn configmap_names(cluster: &MockCluster) -> Vec<String> {
    cluster
        .objects(&configmaps())
        .iter()
        .filter_map(|cm| cm.metadata.name.clone())
        .collect()
}

#[tokio::test]
async fn test_install_then_teardown_with_stuck_dependents() {
    let cluster = MockCluster::new();
    let installer = MockInstaller::new();
    let reconciler = Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(installer.clone()),
        config(),
    );

    cluster.add_secret(credentials());
    cluster.add_operator(operator());
    cluster.set_api_resources(catalog());

    // Install
    assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Outcome::FinalizerAdded);
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Processing)
    );
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Ready)
    );
    assert_eq!(ready_reason(&cluster), "ReconcileSucceeded");

    let request = installer.last_request().unwrap();
    assert_eq!(request.namespace, NS);
    assert_eq!(request.values["manager"]["secret"]["clientid"], "my-client");
    assert_eq!(request.values["cluster"]["id"], "cluster-1");

    // Steady state writes nothing
    let before = cluster.operation_counts().status_updates;
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Unchanged(State::Ready)
    );
    assert_eq!(cluster.operation_counts().status_updates, before);

    // Dependents whose own controller is gone never lose their finalizers
    add_stuck_dependents(&cluster);

    // Teardown
    cluster.mark_operator_deleted(NS, NAME);
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Deleting)
    );
    assert_eq!(ready_reason(&cluster), "HardDeleting");

    assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Outcome::Released);

    assert!(cluster.operator(NS, NAME).is_none());
    assert_eq!(cluster.object_count(&service_instances()), 0);
    assert_eq!(cluster.object_count(&service_bindings()), 0);
    assert!(!cluster.has_secret("default", "db-binding"));

    assert_eq!(configmap_names(&cluster), vec!["user-config".to_string()]);
    assert!(cluster.operation_counts().finalizer_removals >= 2);
}

#[tokio::test]
async fn test_missing_secret_recovers_once_created() {
    let cluster = MockCluster::new();
    let installer = MockInstaller::new();
    let reconciler = Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(installer.clone()),
        config(),
    );
    cluster.add_operator(operator());

    reconciler.reconcile(NS, NAME).await.unwrap();
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Error)
    );
    assert_eq!(ready_reason(&cluster), "MissingSecret");
    assert_eq!(installer.calls(), 0);

    cluster.add_secret(credentials());
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Processing)
    );
    assert_eq!(
        reconciler.reconcile(NS, NAME).await.unwrap(),
        Outcome::Transitioned(State::Ready)
    );
    assert_eq!(installer.calls(), 1);
}

#[tokio::test]
async fn test_teardown_without_stuck_dependents_skips_soft_delete() {
    let cluster = MockCluster::new();
    let installer = MockInstaller::new();
    let reconciler = Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(installer.clone()),
        config(),
    );
    cluster.add_secret(credentials());
    cluster.add_operator(operator());
    cluster.add_object(
        &service_instances(),
        dynamic_object(&service_instances(), Some("default"), "cache", &[], &[]),
    );

    for _ in 0..3 {
        reconciler.reconcile(NS, NAME).await.unwrap();
    }
    cluster.mark_operator_deleted(NS, NAME);
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Outcome::Released);

    assert_eq!(cluster.object_count(&service_instances()), 0);
    assert_eq!(cluster.operation_counts().finalizer_removals, 0);
    assert!(cluster.operator(NS, NAME).is_none());
}

#[tokio::test]
async fn test_failed_hard_delete_soft_deletes_then_collects() {
    let cluster = MockCluster::new();
    cluster.set_api_resources(catalog());
    add_stuck_dependents(&cluster);
    cluster.set_fault("ServiceBinding", Fault::ServerError { remaining: 1 });

    // Long enough that only the failure can end the race in time
    let mut config = config();
    config.hard_delete_timeout = Duration::from_secs(30);
    let started = tokio::time::Instant::now();
    let report = DeletionOrchestrator::new(Arc::new(cluster.clone()), Arc::new(config))
        .run()
        .await
        .unwrap();

    assert_eq!(report.path, TeardownPath::SoftAfterFailure);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.kinds_collected, 1);

    assert_eq!(cluster.object_count(&service_instances()), 0);
    assert_eq!(cluster.object_count(&service_bindings()), 0);
    assert!(!cluster.has_secret("default", "db-binding"));
    assert_eq!(configmap_names(&cluster), vec!["user-config".to_string()]);
    assert_eq!(cluster.operation_counts().finalizer_removals, 2);
}

#[tokio::test]
async fn test_reconciler_releases_after_failed_hard_delete() {
    let cluster = MockCluster::new();
    let installer = MockInstaller::new();
    let mut config = config();
    config.hard_delete_timeout = Duration::from_secs(30);
    let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(installer), config);
    cluster.add_secret(credentials());
    cluster.add_operator(operator());
    cluster.set_api_resources(catalog());

    for _ in 0..3 {
        reconciler.reconcile(NS, NAME).await.unwrap();
    }
    add_stuck_dependents(&cluster);
    cluster.set_fault("ServiceBinding", Fault::ServerError { remaining: 1 });

    cluster.mark_operator_deleted(NS, NAME);
    let started = tokio::time::Instant::now();
    reconciler.reconcile(NS, NAME).await.unwrap();
    assert_eq!(reconciler.reconcile(NS, NAME).await.unwrap(), Outcome::Released);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(cluster.operator(NS, NAME).is_none());
    assert!(!cluster.has_secret("default", "db-binding"));
    assert_eq!(configmap_names(&cluster), vec!["user-config".to_string()]);
}
