//! Credential Secret validation
//!
//! The managed module cannot be installed without service-manager credentials.
//! They are read from a single well-known Secret whose `data` must carry every
//! key in [`REQUIRED_KEYS`] with a non-empty value.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;

use crate::error::{CoreError, Result};

pub const CLIENT_ID_KEY: &str = "clientid";
pub const CLIENT_SECRET_KEY: &str = "clientsecret";
pub const SM_URL_KEY: &str = "sm_url";
pub const TOKEN_URL_KEY: &str = "tokenurl";
pub const CLUSTER_ID_KEY: &str = "cluster_id";

/// Keys that must be present and non-empty, checked in this order
pub const REQUIRED_KEYS: [&str; 5] = [
    CLIENT_ID_KEY,
    CLIENT_SECRET_KEY,
    SM_URL_KEY,
    TOKEN_URL_KEY,
    CLUSTER_ID_KEY,
];

/// Validated credential values
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub sm_url: String,
    pub token_url: String,
    pub cluster_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("sm_url", &self.sm_url)
            .field("token_url", &self.token_url)
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

impl Credentials {
    /// Validate a Secret `data` map and extract the credential values
    ///
    /// Fails on the first required key that is absent or empty.
    pub fn from_secret_data(data: Option<&BTreeMap<String, ByteString>>) -> Result<Self> {
        let empty = BTreeMap::new();
        let data = data.unwrap_or(&empty);

        for key in REQUIRED_KEYS {
            match data.get(key) {
                None => {
                    return Err(CoreError::MissingKey {
                        key: key.to_string(),
                    });
                }
                Some(value) if value.0.is_empty() => {
                    return Err(CoreError::EmptyValue {
                        key: key.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        let value = |key: &str| String::from_utf8_lossy(&data[key].0).into_owned();
        Ok(Self {
            client_id: value(CLIENT_ID_KEY),
            client_secret: value(CLIENT_SECRET_KEY),
            sm_url: value(SM_URL_KEY),
            token_url: value(TOKEN_URL_KEY),
            cluster_id: value(CLUSTER_ID_KEY),
        })
    }
}
