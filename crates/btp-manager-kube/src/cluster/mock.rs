//! Mock cluster driver for testing
//!
//! Keeps operators, Secrets, namespaces and dynamic objects in memory and
//! mimics the API server's finalizer handling: deleting an object that still
//! carries finalizers only marks it, and the object disappears once its
//! finalizers are stripped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use btp_manager_core::BtpOperator;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResourceList, Time};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};

use super::Cluster;
use crate::error::{KubeError, Result};

/// Injected failure for every call touching a given kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next `remaining` deletes of the kind fail with a server error
    ServerError { remaining: usize },
    /// Deletes of the kind are rejected with 405
    MethodNotSupported,
    /// The kind is not served at all
    NoMatch,
    /// Every call for the kind answers 404
    NotFound,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
    pub delete_collections: usize,
    pub finalizer_removals: usize,
    pub discoveries: usize,
}

type ObjectKey = (String, String, Option<String>, String);

#[derive(Default)]
struct MockState {
    operators: BTreeMap<(String, String), BtpOperator>,
    secrets: BTreeMap<(String, String), Secret>,
    namespaces: BTreeSet<String>,
    /// (group, kind, namespace, name) -> object
    objects: BTreeMap<ObjectKey, DynamicObject>,
    catalog: Vec<APIResourceList>,
    faults: HashMap<String, Fault>,
    operations: OperationCounts,
}

impl MockState {
    /// Fail the call if a fault is registered for the kind
    fn check_fault(&mut self, resource: &ApiResource, deleting: bool) -> Result<()> {
        let Some(fault) = self.faults.get_mut(&resource.kind) else {
            return Ok(());
        };
        match fault {
            Fault::NotFound => Err(KubeError::api(
                404,
                "NotFound",
                format!("the server could not find the requested resource ({})", resource.plural),
            )),
            Fault::NoMatch => Err(KubeError::NoMatch {
                kind: resource.kind.clone(),
            }),
            Fault::MethodNotSupported if deleting => Err(KubeError::api(
                405,
                "MethodNotAllowed",
                format!("the server does not allow this method on {}", resource.plural),
            )),
            Fault::ServerError { remaining } if deleting && *remaining > 0 => {
                *remaining -= 1;
                Err(KubeError::api(
                    500,
                    "InternalError",
                    format!("injected failure deleting {}", resource.plural),
                ))
            }
            _ => Ok(()),
        }
    }

    fn keys_matching(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Vec<ObjectKey> {
        self.objects
            .iter()
            .filter(|((group, kind, ns, _), _)| {
                *group == resource.group
                    && *kind == resource.kind
                    && namespace.is_none_or(|n| ns.as_deref() == Some(n))
            })
            .filter(|(_, obj)| label_selector.is_none_or(|s| matches_selector(obj, s)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Delete an object the way the API server does: mark it while finalizers remain
    fn delete_key(&mut self, key: &ObjectKey) {
        let Some(obj) = self.objects.get_mut(key) else {
            return;
        };
        if obj.finalizers().is_empty() {
            self.objects.remove(key);
        } else if obj.metadata.deletion_timestamp.is_none() {
            obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }
}

/// Equality-based label selector matching (`a=b,c=d` or bare `key`)
fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

fn object_key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        resource.group.clone(),
        resource.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn not_found(kind: &str, name: &str) -> KubeError {
    KubeError::api(404, "NotFound", format!("{} \"{}\" not found", kind, name))
}

/// Build a dynamic object with the given finalizers and labels
pub fn dynamic_object(
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    finalizers: &[&str],
    labels: &[(&str, &str)],
) -> DynamicObject {
    let mut obj = DynamicObject::new(name, resource);
    obj.metadata.namespace = namespace.map(str::to_string);
    if !finalizers.is_empty() {
        obj.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
    }
    if !labels.is_empty() {
        obj.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }
    obj
}

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl MockCluster {
    /// Create a new empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.state().operations.clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        self.state().operations = OperationCounts::default();
    }

    pub fn add_namespace(&self, name: &str) {
        self.state().namespaces.insert(name.to_string());
    }

    /// Store an operator CR; its namespace is registered too
    pub fn add_operator(&self, operator: BtpOperator) {
        let namespace = operator.namespace().unwrap_or_default();
        let mut state = self.state();
        state.namespaces.insert(namespace.clone());
        state
            .operators
            .insert((namespace, operator.name_any()), operator);
    }

    /// Current stored copy of an operator CR
    pub fn operator(&self, namespace: &str, name: &str) -> Option<BtpOperator> {
        self.state()
            .operators
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Request deletion of an operator CR, as `kubectl delete` would
    pub fn mark_operator_deleted(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state();
        let Some(operator) = state.operators.get_mut(&key) else {
            return;
        };
        if operator.finalizers().is_empty() {
            state.operators.remove(&key);
        } else if operator.metadata.deletion_timestamp.is_none() {
            operator.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn add_secret(&self, secret: Secret) {
        let namespace = secret.namespace().unwrap_or_default();
        let mut state = self.state();
        state.namespaces.insert(namespace.clone());
        state.secrets.insert((namespace, secret.name_any()), secret);
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .secrets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Store a dynamic object of the given kind
    pub fn add_object(&self, resource: &ApiResource, obj: DynamicObject) {
        let key = object_key(resource, obj.metadata.namespace.as_deref(), &obj.name_any());
        let mut state = self.state();
        if let Some(ns) = &obj.metadata.namespace {
            state.namespaces.insert(ns.clone());
        }
        state.objects.insert(key, obj);
    }

    /// Every stored object of a kind, across namespaces
    pub fn objects(&self, resource: &ApiResource) -> Vec<DynamicObject> {
        let state = self.state();
        state
            .keys_matching(resource, None, None)
            .iter()
            .filter_map(|key| state.objects.get(key).cloned())
            .collect()
    }

    pub fn object_count(&self, resource: &ApiResource) -> usize {
        self.objects(resource).len()
    }

    /// Replace the resource catalog served to discovery
    pub fn set_api_resources(&self, catalog: Vec<APIResourceList>) {
        self.state().catalog = catalog;
    }

    /// Inject a fault for every call on the given kind
    pub fn set_fault(&self, kind: &str, fault: Fault) {
        self.state().faults.insert(kind.to_string(), fault);
    }

    pub fn clear_fault(&self, kind: &str) {
        self.state().faults.remove(kind);
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn get_operator(&self, namespace: &str, name: &str) -> Result<Option<BtpOperator>> {
        let mut state = self.state();
        state.operations.gets += 1;
        Ok(state
            .operators
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update_operator(&self, operator: &BtpOperator) -> Result<BtpOperator> {
        let key = (operator.namespace().unwrap_or_default(), operator.name_any());
        let mut state = self.state();
        state.operations.updates += 1;

        let stored = state
            .operators
            .get_mut(&key)
            .ok_or_else(|| not_found(BtpOperator::kind(&()).as_ref(), &key.1))?;
        stored.metadata.finalizers = operator.metadata.finalizers.clone();
        stored.metadata.labels = operator.metadata.labels.clone();
        stored.metadata.annotations = operator.metadata.annotations.clone();
        stored.spec = operator.spec.clone();
        let updated = stored.clone();

        // The API server drops an object being deleted once its last finalizer is gone
        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            state.operators.remove(&key);
        }
        Ok(updated)
    }

    async fn update_operator_status(&self, operator: &BtpOperator) -> Result<BtpOperator> {
        let key = (operator.namespace().unwrap_or_default(), operator.name_any());
        let mut state = self.state();
        state.operations.status_updates += 1;

        let stored = state
            .operators
            .get_mut(&key)
            .ok_or_else(|| not_found(BtpOperator::kind(&()).as_ref(), &key.1))?;
        stored.status = operator.status.clone();
        Ok(stored.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let mut state = self.state();
        state.operations.gets += 1;
        Ok(state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.operations.deletes += 1;
        state
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut state = self.state();
        state.operations.lists += 1;
        Ok(state.namespaces.iter().cloned().collect())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.state();
        state.operations.lists += 1;
        state.check_fault(resource, false)?;

        let keys = state.keys_matching(resource, namespace, None);
        Ok(keys
            .iter()
            .filter_map(|key| state.objects.get(key).cloned())
            .collect())
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.operations.deletes += 1;
        state.check_fault(resource, true)?;

        let key = object_key(resource, namespace, name);
        if !state.objects.contains_key(&key) {
            return Err(not_found(&resource.kind, name));
        }
        state.delete_key(&key);
        Ok(())
    }

    async fn delete_collection(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        state.operations.delete_collections += 1;
        state.check_fault(resource, true)?;

        for key in state.keys_matching(resource, namespace, label_selector) {
            state.delete_key(&key);
        }
        Ok(())
    }

    async fn remove_finalizers(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.operations.finalizer_removals += 1;
        state.check_fault(resource, false)?;

        let key = object_key(resource, namespace, name);
        let obj = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| not_found(&resource.kind, name))?;
        obj.metadata.finalizers = None;
        if obj.metadata.deletion_timestamp.is_some() {
            state.objects.remove(&key);
        }
        Ok(())
    }

    async fn api_resources(&self) -> Result<Vec<APIResourceList>> {
        let mut state = self.state();
        state.operations.discoveries += 1;
        Ok(state.catalog.clone())
    }
}
