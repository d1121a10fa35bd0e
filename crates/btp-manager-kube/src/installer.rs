//! Installation of the managed module chart
//!
//! The reconciler only needs to know whether the module is installed and
//! ready, so installation sits behind the [`ChartInstaller`] trait:
//! - **ManifestInstaller**: renders a directory of minijinja templates and
//!   server-side-applies the result
//! - **MockInstaller**: returns a scripted answer, for tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use btp_manager_core::{BtpOperator, Credentials, ReconcilerConfig};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Client, ResourceExt,
    api::{Api, DynamicObject, Patch, PatchParams},
    core::{GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
};
use minijinja::Environment;
use serde_json::json;
use walkdir::WalkDir;

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "btp-manager";

/// Everything needed to install one release of the module chart
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub release_name: String,
    pub chart_path: PathBuf,
    pub namespace: String,
    pub create_namespace: bool,
    /// Wait for workloads to become ready before reporting success
    pub wait: bool,
    pub values: serde_json::Value,
    /// Labels stamped on every installed object
    pub labels: BTreeMap<String, String>,
}

impl InstallRequest {
    /// Build the install request for an operator CR
    pub fn for_operator(
        operator: &BtpOperator,
        credentials: &Credentials,
        config: &ReconcilerConfig,
    ) -> Self {
        let values = json!({
            "manager": {
                "secret": {
                    "clientid": credentials.client_id,
                    "clientsecret": credentials.client_secret,
                    "sm_url": credentials.sm_url,
                    "tokenurl": credentials.token_url,
                }
            },
            "cluster": {
                "id": credentials.cluster_id,
            }
        });

        let label = &config.ownership_label;
        Self {
            release_name: operator.name_any(),
            chart_path: config.chart_path.clone(),
            namespace: config.chart_namespace.clone(),
            create_namespace: true,
            wait: true,
            values,
            labels: BTreeMap::from([(label.key.clone(), label.value.clone())]),
        }
    }
}

/// Installs the module chart and reports readiness
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install or upgrade; `Ok(false)` means applied but not ready yet
    async fn install(&self, request: &InstallRequest) -> Result<bool>;
}

/// Directory holding the chart's templates (`templates/` when present)
fn templates_dir(chart_path: &Path) -> PathBuf {
    let nested = chart_path.join("templates");
    if nested.is_dir() {
        nested
    } else {
        chart_path.to_path_buf()
    }
}

fn is_template(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "j2")
    )
}

/// Split a multi-document YAML stream on `---` separator lines
fn split_documents(manifest: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    for line in manifest.lines() {
        if line.trim_end() == "---" {
            documents.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|l| !l.trim().is_empty() && !l.trim().starts_with('#'))
        })
        .collect()
}

/// Convert TypeMeta to GroupVersionKind
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    match tm.api_version.rsplit_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, &tm.kind),
        None => GroupVersionKind::gvk("", &tm.api_version, &tm.kind),
    }
}

/// Serialize a value as a JSON literal, which is also a valid YAML scalar
///
/// Usage: {{ values.manager.secret.clientsecret | tojson }}
fn tojson(value: minijinja::Value) -> std::result::Result<String, minijinja::Error> {
    serde_json::to_string(&value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
}

/// Render every template of the chart into labelled objects
///
/// Files whose name starts with `_` are loaded as helpers (for `import` and
/// `include`) but not rendered on their own.
pub fn render_manifests(request: &InstallRequest) -> Result<Vec<DynamicObject>> {
    let dir = templates_dir(&request.chart_path);
    if !dir.is_dir() {
        return Err(KubeError::InvalidManifest(format!(
            "chart directory {} does not exist",
            dir.display()
        )));
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env.add_filter("tojson", tojson);

    let mut names = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(|e| KubeError::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_template(path) {
            continue;
        }
        let name = path
            .strip_prefix(&dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read_to_string(path)?;
        env.add_template_owned(name.clone(), content)?;

        let helper = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('_'))
            .unwrap_or(false);
        if !helper {
            names.push(name);
        }
    }

    let ctx = minijinja::context! {
        values => &request.values,
        release => minijinja::context! {
            name => &request.release_name,
            namespace => &request.namespace,
        },
    };

    let mut objects = Vec::new();
    for name in &names {
        let rendered = env.get_template(name)?.render(&ctx)?;
        for (index, doc) in split_documents(&rendered).iter().enumerate() {
            let mut obj: DynamicObject = serde_yaml::from_str(doc).map_err(|e| {
                KubeError::InvalidManifest(format!("{} (document {}): {}", name, index, e))
            })?;
            if obj.types.is_none() {
                return Err(KubeError::InvalidManifest(format!(
                    "{} (document {}): missing apiVersion or kind",
                    name, index
                )));
            }
            let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
            labels.extend(request.labels.clone());
            objects.push(obj);
        }
    }

    Ok(objects)
}

/// Whether a Deployment has every desired replica ready, updated and available
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    ready == desired && updated == desired && available == desired
}

/// Installs charts by rendering templates and applying them with Server-Side Apply
pub struct ManifestInstaller {
    client: Client,
}

impl ManifestInstaller {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&namespace),
        )
        .await?;
        Ok(())
    }

    /// Apply one object, returning the namespace it landed in
    async fn apply(
        &self,
        discovery: &Discovery,
        mut obj: DynamicObject,
        default_namespace: &str,
    ) -> Result<Option<String>> {
        let type_meta = obj
            .types
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("missing apiVersion or kind".to_string()))?;
        let gvk = gvk_from_type_meta(&type_meta);
        let (resource, capabilities) =
            discovery.resolve_gvk(&gvk).ok_or_else(|| KubeError::NoMatch {
                kind: format!("{}/{}", type_meta.api_version, type_meta.kind),
            })?;

        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest(format!("{} without name", gvk.kind)))?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
            let namespace = obj
                .metadata
                .namespace
                .get_or_insert_with(|| default_namespace.to_string())
                .clone();
            Api::namespaced_with(self.client.clone(), &namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;
        tracing::debug!(kind = %gvk.kind, name = %name, "applied");

        Ok(obj.metadata.namespace.clone())
    }

    /// Check every applied Deployment
    async fn workloads_ready(&self, deployments: &[(String, String)]) -> Result<bool> {
        for (namespace, name) in deployments {
            let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
            match api.get_opt(name).await? {
                Some(deployment) if deployment_ready(&deployment) => {}
                _ => {
                    tracing::debug!(namespace = %namespace, name = %name, "deployment not ready");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ChartInstaller for ManifestInstaller {
    async fn install(&self, request: &InstallRequest) -> Result<bool> {
        let objects = render_manifests(request).map_err(|e| KubeError::Install(e.to_string()))?;

        if request.create_namespace {
            self.ensure_namespace(&request.namespace).await?;
        }

        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut deployments = Vec::new();
        for obj in objects {
            let is_deployment = obj
                .types
                .as_ref()
                .is_some_and(|t| t.kind == "Deployment" && t.api_version == "apps/v1");
            let name = obj.name_any();
            let namespace = self.apply(&discovery, obj, &request.namespace).await?;
            if is_deployment {
                if let Some(namespace) = namespace {
                    deployments.push((namespace, name));
                }
            }
        }

        tracing::info!(
            release = %request.release_name,
            namespace = %request.namespace,
            "module chart applied"
        );

        if !request.wait {
            return Ok(true);
        }
        self.workloads_ready(&deployments).await
    }
}

#[derive(Debug, Clone)]
enum MockAnswer {
    Ready(bool),
    Fail(String),
}

#[derive(Debug)]
struct MockInstallerState {
    answer: MockAnswer,
    calls: usize,
    last_request: Option<InstallRequest>,
}

/// Installer returning a configurable answer, for tests
#[derive(Clone)]
pub struct MockInstaller {
    state: Arc<Mutex<MockInstallerState>>,
}

impl Default for MockInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstaller {
    /// Create an installer that reports ready
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockInstallerState {
                answer: MockAnswer::Ready(true),
                calls: 0,
                last_request: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockInstallerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_ready(&self, ready: bool) {
        self.state().answer = MockAnswer::Ready(ready);
    }

    /// Make every following install fail with the given message
    pub fn fail_with(&self, message: &str) {
        self.state().answer = MockAnswer::Fail(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn last_request(&self) -> Option<InstallRequest> {
        self.state().last_request.clone()
    }
}

#[async_trait]
impl ChartInstaller for MockInstaller {
    async fn install(&self, request: &InstallRequest) -> Result<bool> {
        let mut state = self.state();
        state.calls += 1;
        state.last_request = Some(request.clone());
        match &state.answer {
            MockAnswer::Ready(ready) => Ok(*ready),
            MockAnswer::Fail(message) => Err(KubeError::Install(message.clone())),
        }
    }
}
