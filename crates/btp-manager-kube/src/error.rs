//! Error types for btp-manager-kube

use kube::core::ErrorResponse;
use thiserror::Error;

/// Result type for btp-manager-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling the operator CR
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Resource kind is not served by the API server
    #[error("no matches for kind '{kind}'")]
    NoMatch { kind: String },

    /// Credential Secret does not exist
    #[error("secret {namespace}/{name} not found")]
    MissingSecret { namespace: String, name: String },

    /// Credential Secret exists but is unusable
    #[error("invalid secret: {0}")]
    InvalidSecret(#[source] btp_manager_core::CoreError),

    /// Chart installation failed
    #[error("chart installation failed: {0}")]
    Install(String),

    /// Instances of a dependent kind survived finalizer removal
    #[error("finalizers deletion assurance has failed: {remaining} {kind} left")]
    SoftDeleteIncomplete { kind: String, remaining: usize },

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] btp_manager_core::CoreError),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<minijinja::Error> for KubeError {
    fn from(e: minijinja::Error) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl KubeError {
    /// Build an API error with the given HTTP status code
    pub fn api(code: u16, reason: &str, message: impl Into<String>) -> Self {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.into(),
            reason: reason.to_string(),
            code,
        }))
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if the verb is not supported by the resource (405)
    pub fn is_method_not_supported(&self) -> bool {
        self.api_code() == Some(405)
    }

    /// Check if a kind could not be resolved through discovery
    ///
    /// Only the installer's discovery lookup (and the mock cluster) produce this;
    /// the live cluster driver reports unserved kinds as a 404.
    pub fn is_no_match(&self) -> bool {
        matches!(self, KubeError::NoMatch { .. })
    }

    /// Errors a bulk delete may safely ignore: the target is gone or cannot be deleted
    pub fn is_ignorable_on_delete(&self) -> bool {
        self.is_not_found() || self.is_no_match() || self.is_method_not_supported()
    }
}
