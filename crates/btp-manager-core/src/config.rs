//! Reconciler configuration
//!
//! Every tunable the controller needs (names, label, timeouts) is carried in a
//! [`ReconcilerConfig`] handed to the reconciler at construction time. It can be
//! loaded from a camelCase YAML file where every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Label stamped on every installed object and used to scope garbage collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipLabel {
    pub key: String,
    pub value: String,
}

impl Default for OwnershipLabel {
    fn default() -> Self {
        Self {
            key: "app.kubernetes.io/managed-by".to_string(),
            value: "btp-manager".to_string(),
        }
    }
}

impl OwnershipLabel {
    /// Label selector matching this label (`key=value`)
    pub fn selector(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Directory holding the module chart templates
    #[serde(default = "default_chart_path")]
    pub chart_path: PathBuf,

    /// Namespace the module is installed into; also holds the credential Secret
    #[serde(default = "default_chart_namespace")]
    pub chart_namespace: String,

    /// Name of the credential Secret
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    /// Workload Deployment removed first during teardown
    #[serde(default = "default_deployment_name")]
    pub deployment_name: String,

    /// Finalizer guarding the operator CR
    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    #[serde(default)]
    pub ownership_label: OwnershipLabel,

    /// Deadline for the hard delete before falling back to soft delete (default: 5m)
    #[serde(default = "default_hard_delete_timeout", with = "humantime_serde")]
    pub hard_delete_timeout: Duration,

    /// Poll interval while waiting for dependents to disappear (default: 10s)
    #[serde(default = "default_hard_delete_check_interval", with = "humantime_serde")]
    pub hard_delete_check_interval: Duration,

    /// Pause before label-scoped garbage collection (default: 10s)
    #[serde(default = "default_cleanup_settle_delay", with = "humantime_serde")]
    pub cleanup_settle_delay: Duration,

    /// Requeue cadence for CRs in Error or still installing (default: 5s)
    #[serde(default = "default_requeue_interval", with = "humantime_serde")]
    pub requeue_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            chart_path: default_chart_path(),
            chart_namespace: default_chart_namespace(),
            secret_name: default_secret_name(),
            deployment_name: default_deployment_name(),
            finalizer: default_finalizer(),
            ownership_label: OwnershipLabel::default(),
            hard_delete_timeout: default_hard_delete_timeout(),
            hard_delete_check_interval: default_hard_delete_check_interval(),
            cleanup_settle_delay: default_cleanup_settle_delay(),
            requeue_interval: default_requeue_interval(),
        }
    }
}

fn default_chart_path() -> PathBuf {
    PathBuf::from("./module-chart")
}

fn default_chart_namespace() -> String {
    "kyma-system".to_string()
}

fn default_secret_name() -> String {
    "sap-btp-manager".to_string()
}

fn default_deployment_name() -> String {
    "sap-btp-operator-controller-manager".to_string()
}

fn default_finalizer() -> String {
    "custom-deletion-finalizer".to_string()
}

fn default_hard_delete_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_hard_delete_check_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_cleanup_settle_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_requeue_interval() -> Duration {
    Duration::from_secs(5)
}

impl ReconcilerConfig {
    /// Load a configuration file, filling unset fields with defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("chartNamespace", &self.chart_namespace),
            ("secretName", &self.secret_name),
            ("deploymentName", &self.deployment_name),
            ("finalizer", &self.finalizer),
            ("ownershipLabel.key", &self.ownership_label.key),
            ("ownershipLabel.value", &self.ownership_label.value),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidConfig {
                    message: format!("{} must not be empty", field),
                });
            }
        }

        let durations = [
            ("hardDeleteTimeout", self.hard_delete_timeout),
            ("hardDeleteCheckInterval", self.hard_delete_check_interval),
            ("requeueInterval", self.requeue_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(CoreError::InvalidConfig {
                    message: format!("{} must be greater than zero", field),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.chart_namespace, "kyma-system");
        assert_eq!(config.secret_name, "sap-btp-manager");
        assert_eq!(config.finalizer, "custom-deletion-finalizer");
        assert_eq!(config.hard_delete_timeout, Duration::from_secs(300));
        assert_eq!(
            config.ownership_label.selector(),
            "app.kubernetes.io/managed-by=btp-manager"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = ReconcilerConfig::from_yaml(
            r#"
chartNamespace: btp-system
hardDeleteTimeout: 30s
requeueInterval: 1m
"#,
        )
        .unwrap();

        assert_eq!(config.chart_namespace, "btp-system");
        assert_eq!(config.hard_delete_timeout, Duration::from_secs(30));
        assert_eq!(config.requeue_interval, Duration::from_secs(60));
        assert_eq!(config.secret_name, "sap-btp-manager");
        assert_eq!(config.cleanup_settle_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_ownership_label_from_yaml() {
        let config = ReconcilerConfig::from_yaml(
            r#"
ownershipLabel:
  key: example.com/owner
  value: tests
"#,
        )
        .unwrap();
        assert_eq!(config.ownership_label.selector(), "example.com/owner=tests");
    }

    #[test]
    fn test_rejects_empty_names() {
        let err = ReconcilerConfig::from_yaml("secretName: \"\"").unwrap_err();
        assert!(err.to_string().contains("secretName"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = ReconcilerConfig::from_yaml("hardDeleteTimeout: 0s").unwrap_err();
        assert!(err.to_string().contains("hardDeleteTimeout"));
    }

    #[test]
    fn test_zero_settle_delay_is_allowed() {
        let config = ReconcilerConfig::from_yaml("cleanupSettleDelay: 0s").unwrap();
        assert!(config.cleanup_settle_delay.is_zero());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deploymentName: custom-manager").unwrap();

        let config = ReconcilerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.deployment_name, "custom-manager");
    }

    #[test]
    fn test_missing_file() {
        let err = ReconcilerConfig::from_file("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
