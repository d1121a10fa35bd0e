//! btp-manager Kube - Kubernetes side of the BTP operator lifecycle controller
//!
//! This crate provides:
//! - **Cluster drivers**: a live `kube::Client` backed driver and an in-memory mock
//! - **Reconciler**: the state machine driving `BtpOperator` CRs
//! - **Teardown**: hard delete raced against a deadline, soft-delete fallback
//!   and label-scoped garbage collection over discovered kinds
//! - **Installer**: renders the module chart and applies it server-side
//! - **Routing**: watch event predicates feeding the controller queue

pub mod cluster;
pub mod controller;
pub mod deletion;
pub mod discovery;
pub mod error;
pub mod gatekeeper;
pub mod installer;
pub mod reconciler;
pub mod router;

pub use cluster::{Cluster, Fault, KubeCluster, MockCluster, OperationCounts, dynamic_object};
pub use controller::{Context, error_policy, reconcile, run_controller};
pub use deletion::{DeletionOrchestrator, TeardownPath, TeardownReport};
pub use discovery::{DeletableKind, deletable_kinds};
pub use error::{KubeError, Result};
pub use gatekeeper::fetch_credentials;
pub use installer::{ChartInstaller, InstallRequest, ManifestInstaller, MockInstaller};
pub use reconciler::{Outcome, Reconciler};
pub use router::{Change, OperatorFilter, SecretFilter};
