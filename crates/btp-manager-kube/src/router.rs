//! Watch event routing
//!
//! Two streams feed the reconcile queue: the operator CRs themselves and the
//! credential Secret. The predicates decide which changes are worth a
//! reconcile; the filters apply them to raw watcher events by remembering the
//! last version seen of each object.

use std::collections::HashMap;

use btp_manager_core::{BtpOperator, State};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::watcher::Event;

/// A change observed on a watched object
#[derive(Debug, Clone, Copy)]
pub enum Change<'a, K> {
    Created(&'a K),
    Updated { old: &'a K, new: &'a K },
    Deleted(&'a K),
}

/// Whether a CR change should trigger a reconcile
///
/// Updates that move the CR into `Error` are dropped: the reconciler wrote
/// them itself and requeues on its own. Deletion is never held back.
pub fn operator_change_enqueues(change: &Change<'_, BtpOperator>) -> bool {
    match change {
        Change::Created(_) | Change::Deleted(_) => true,
        Change::Updated { old, new } => {
            let entering_error = old.state() != State::Error && new.state() == State::Error;
            let deletion_requested = !old.is_being_deleted() && new.is_being_deleted();
            !entering_error || deletion_requested
        }
    }
}

/// Whether a Secret change should trigger a reconcile of every CR
///
/// Only the credential Secret counts, and an update only when its data changed.
pub fn secret_change_enqueues(change: &Change<'_, Secret>, namespace: &str, name: &str) -> bool {
    let is_target =
        |s: &Secret| s.namespace().as_deref() == Some(namespace) && s.name_any() == name;
    match change {
        Change::Created(secret) | Change::Deleted(secret) => is_target(secret),
        Change::Updated { old, new } => is_target(new) && old.data != new.data,
    }
}

fn object_key<K: ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Turns CR watcher events into reconcile triggers
#[derive(Debug, Default)]
pub struct OperatorFilter {
    seen: HashMap<(String, String), BtpOperator>,
}

impl OperatorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a watch event, returning the object to enqueue
    pub fn admit(&mut self, event: Event<BtpOperator>) -> Option<BtpOperator> {
        match event {
            Event::Init => {
                self.seen.clear();
                None
            }
            Event::InitDone => None,
            // Relisted objects count as creations
            Event::InitApply(obj) => {
                self.seen.insert(object_key(&obj), obj.clone());
                Some(obj)
            }
            Event::Apply(obj) => {
                let key = object_key(&obj);
                let admitted = match self.seen.get(&key) {
                    Some(old) => operator_change_enqueues(&Change::Updated { old, new: &obj }),
                    None => operator_change_enqueues(&Change::Created(&obj)),
                };
                self.seen.insert(key, obj.clone());
                admitted.then_some(obj)
            }
            Event::Delete(obj) => {
                self.seen.remove(&object_key(&obj));
                operator_change_enqueues(&Change::Deleted(&obj)).then_some(obj)
            }
        }
    }
}

/// Turns Secret watcher events into reconcile triggers
#[derive(Debug)]
pub struct SecretFilter {
    namespace: String,
    name: String,
    last: Option<Secret>,
}

impl SecretFilter {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            last: None,
        }
    }

    /// Admit a watch event, returning the Secret that triggers a reconcile
    pub fn admit(&mut self, event: Event<Secret>) -> Option<Secret> {
        let change_enqueues = |change: &Change<'_, Secret>| {
            secret_change_enqueues(change, &self.namespace, &self.name)
        };

        let admitted = match &event {
            Event::Init | Event::InitDone => false,
            Event::InitApply(secret) => change_enqueues(&Change::Created(secret)),
            Event::Apply(secret) => match &self.last {
                Some(old) => change_enqueues(&Change::Updated { old, new: secret }),
                None => change_enqueues(&Change::Created(secret)),
            },
            Event::Delete(secret) => change_enqueues(&Change::Deleted(secret)),
        };

        match event {
            Event::Init => {
                self.last = None;
                None
            }
            Event::InitDone => None,
            Event::InitApply(secret) | Event::Apply(secret) => {
                let is_target = secret.namespace().as_deref() == Some(self.namespace.as_str())
                    && secret.name_any() == self.name;
                if is_target {
                    self.last = Some(secret.clone());
                }
                admitted.then_some(secret)
            }
            Event::Delete(secret) => {
                if admitted {
                    self.last = None;
                }
                admitted.then_some(secret)
            }
        }
    }
}
