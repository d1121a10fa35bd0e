//! btp-manager Core - types shared by the btp-manager controller
//!
//! This crate provides the foundational types used throughout btp-manager:
//! - `BtpOperator`: The operator custom resource and its lifecycle `State`
//! - `Conditions`: The type-keyed status condition ledger and its reason catalog
//! - `Credentials`: Validation of the credential Secret payload
//! - `ReconcilerConfig`: Tunables passed to the reconciler at construction time

pub mod conditions;
pub mod config;
pub mod crd;
pub mod credentials;
pub mod error;

pub use conditions::{ConditionStatus, Conditions, READY_CONDITION, Reason};
pub use config::{OwnershipLabel, ReconcilerConfig};
pub use crd::{BtpOperator, BtpOperatorSpec, BtpOperatorStatus, State};
pub use credentials::{Credentials, REQUIRED_KEYS};
pub use error::{CoreError, Result};
