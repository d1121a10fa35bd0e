//! The `BtpOperator` custom resource
//!
//! The resource carries no spec; its presence requests installation of the
//! managed module and its deletion requests teardown. All controller-owned
//! state lives in the status subresource and in `metadata.finalizers`.

use std::fmt;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "operator.kyma-project.io",
    version = "v1alpha1",
    kind = "BtpOperator",
    namespaced,
    status = "BtpOperatorStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
pub struct BtpOperatorSpec {}

/// Lifecycle state of the operator CR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Not yet seen by the controller (serialized as the empty string)
    #[default]
    #[serde(rename = "")]
    Initial,
    Processing,
    Error,
    Deleting,
    Ready,
    /// Any value this controller does not write; handled like `Error`
    #[serde(other)]
    Unknown,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Initial => "",
            State::Processing => "Processing",
            State::Error => "Error",
            State::Deleting => "Deleting",
            State::Ready => "Ready",
            State::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Initial => f.write_str("Initial"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BtpOperatorStatus {
    #[serde(default)]
    pub state: State,

    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
}

impl BtpOperator {
    /// Current lifecycle state (`Initial` when no status was written yet)
    pub fn state(&self) -> State {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Whether the API server has marked the object for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|existing| existing == finalizer))
    }

    /// Add a finalizer, returning `true` if the object changed
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    /// Release every finalizer, letting the API server remove the object
    pub fn clear_finalizers(&mut self) {
        self.metadata.finalizers = Some(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&State::Initial).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&State::Error).unwrap(), "\"Error\"");

        let parsed: State = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, State::Initial);
        let parsed: State = serde_json::from_str("\"Deleting\"").unwrap();
        assert_eq!(parsed, State::Deleting);
    }

    #[test]
    fn test_unrecognized_state_still_deserializes() {
        let cr: BtpOperator = serde_json::from_value(serde_json::json!({
            "apiVersion": "operator.kyma-project.io/v1alpha1",
            "kind": "BtpOperator",
            "metadata": { "name": "btpoperator", "namespace": "kyma-system" },
            "spec": {},
            "status": { "state": "Warning" }
        }))
        .unwrap();
        assert_eq!(cr.state(), State::Unknown);
    }

    #[test]
    fn test_state_defaults_to_initial() {
        let cr = BtpOperator::new("btpoperator", BtpOperatorSpec::default());
        assert_eq!(cr.state(), State::Initial);

        let status: BtpOperatorStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.state, State::Initial);
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut cr = BtpOperator::new("btpoperator", BtpOperatorSpec::default());
        assert!(!cr.has_finalizer("custom-deletion-finalizer"));

        assert!(cr.add_finalizer("custom-deletion-finalizer"));
        assert!(!cr.add_finalizer("custom-deletion-finalizer"));
        assert!(cr.has_finalizer("custom-deletion-finalizer"));
        assert_eq!(cr.metadata.finalizers.as_ref().unwrap().len(), 1);

        cr.clear_finalizers();
        assert!(!cr.has_finalizer("custom-deletion-finalizer"));
    }

    #[test]
    fn test_status_round_trips_camel_case() {
        let json = serde_json::json!({
            "state": "Ready",
            "conditions": [{
                "type": "Ready",
                "status": "True",
                "reason": "ReconcileSucceeded",
                "message": "ok",
                "lastTransitionTime": "2024-01-01T00:00:00Z"
            }]
        });
        let status: BtpOperatorStatus = serde_json::from_value(json).unwrap();
        assert_eq!(status.state, State::Ready);
        assert!(status.conditions.is_true("Ready"));
    }
}
