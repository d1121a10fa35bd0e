//! Status condition ledger with a fixed reason catalog
//!
//! Conditions are keyed by their `type`. The ledger keeps each condition in the
//! slot it was first inserted into, so the serialized list is stable across
//! updates, and exposes only upsert/get operations to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use indexmap::map::Entry;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The single condition type maintained on the operator CR
pub const READY_CONDITION: &str = "Ready";

/// Status of a condition, as stored in `Condition::status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons the controller reports on the `Ready` condition
///
/// Every reason maps to a fixed `(type, status)` pair, see [`Reason::type_and_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Reason {
    ReconcileSucceeded,
    Initialized,
    Recovered,
    ChartInstallFailed,
    ConsistencyCheckFailed,
    Processing,
    OlderCRExists,
    MissingSecret,
    InvalidSecret,
    HardDeleting,
    DeprovisioningFailed,
    ResourceRemovalFailed,
    HardDeleteFailed,
    SoftDeleteFailed,
    SoftDeleting,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::ReconcileSucceeded => "ReconcileSucceeded",
            Reason::Initialized => "Initialized",
            Reason::Recovered => "Recovered",
            Reason::ChartInstallFailed => "ChartInstallFailed",
            Reason::ConsistencyCheckFailed => "ConsistencyCheckFailed",
            Reason::Processing => "Processing",
            Reason::OlderCRExists => "OlderCRExists",
            Reason::MissingSecret => "MissingSecret",
            Reason::InvalidSecret => "InvalidSecret",
            Reason::HardDeleting => "HardDeleting",
            Reason::DeprovisioningFailed => "DeprovisioningFailed",
            Reason::ResourceRemovalFailed => "ResourceRemovalFailed",
            Reason::HardDeleteFailed => "HardDeleteFailed",
            Reason::SoftDeleteFailed => "SoftDeleteFailed",
            Reason::SoftDeleting => "SoftDeleting",
        }
    }

    /// The condition type and status this reason is reported with
    pub fn type_and_status(&self) -> (&'static str, ConditionStatus) {
        match self {
            Reason::ReconcileSucceeded | Reason::Initialized | Reason::Recovered => {
                (READY_CONDITION, ConditionStatus::True)
            }
            _ => (READY_CONDITION, ConditionStatus::False),
        }
    }

    /// Build a condition for this reason
    pub fn condition(
        &self,
        message: impl Into<String>,
        observed_generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> Condition {
        let (type_, status) = self.type_and_status();
        Condition {
            type_: type_.to_string(),
            status: status.as_str().to_string(),
            reason: self.as_str().to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: Time(now),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered collection of conditions, unique by type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    entries: IndexMap<String, Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a condition, returning the stored record
    ///
    /// - No condition of that type: the new one is appended.
    /// - Existing condition with a different status: replaced in its slot,
    ///   taking the new `last_transition_time`.
    /// - Existing condition with the same status: reason, message and observed
    ///   generation are updated; the transition time is kept.
    pub fn upsert(&mut self, condition: Condition) -> &Condition {
        match self.entries.entry(condition.type_.clone()) {
            Entry::Vacant(slot) => slot.insert(condition),
            Entry::Occupied(slot) => {
                let existing = slot.into_mut();
                if existing.status != condition.status {
                    *existing = condition;
                } else {
                    existing.reason = condition.reason;
                    existing.message = condition.message;
                    existing.observed_generation = condition.observed_generation;
                }
                existing
            }
        }
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.entries.get(type_)
    }

    /// Check whether the condition of the given type has status `True`
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .map(|c| c.status == ConditionStatus::True.as_str())
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Condition>::deserialize(deserializer)?;
        let mut conditions = Conditions::new();
        for condition in list {
            conditions.entries.insert(condition.type_.clone(), condition);
        }
        Ok(conditions)
    }
}
