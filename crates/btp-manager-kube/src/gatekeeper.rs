//! Credential Secret lookup and validation

use btp_manager_core::Credentials;

use crate::cluster::Cluster;
use crate::error::{KubeError, Result};

/// Fetch the credential Secret and validate its payload
///
/// An absent Secret yields [`KubeError::MissingSecret`], an incomplete one
/// [`KubeError::InvalidSecret`]; API failures are passed through unchanged.
pub async fn fetch_credentials<C: Cluster + ?Sized>(
    cluster: &C,
    namespace: &str,
    name: &str,
) -> Result<Credentials> {
    let secret = cluster
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| KubeError::MissingSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    Credentials::from_secret_data(secret.data.as_ref()).map_err(KubeError::InvalidSecret)
}
