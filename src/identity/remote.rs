//! HTTP identity authority client.
//!
//! Sends the credential to an external authority and maps its answer onto
//! accept / deny / fault:
//!
//! | Response | Result |
//! |----------|--------|
//! | `200` + `{"authenticated": b}` | `Ok(b)` |
//! | `401`, `403`, `404` | `Ok(false)` |
//! | anything else, malformed body, transport failure | `Err(..)` |

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::authenticator::Authenticator;
use super::credential::Credential;
use crate::{Error, Result};

/// Request body posted to the identity authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRequest {
    /// Hub the gateway serves
    pub hub_name: String,
    /// Device id
    pub device_id: String,
    /// Module id
    pub module_id: Option<String>,
    /// Client type tag
    pub client_type: String,
    /// Leaf SHA-256 thumbprint
    pub thumbprint: String,
    /// Leaf certificate, base64 DER
    pub certificate: String,
}

impl AuthenticationRequest {
    /// Build the request body for `credential`.
    #[must_use]
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            hub_name: credential.hub_name().to_owned(),
            device_id: credential.identity().device_id().to_owned(),
            module_id: credential.identity().module_id().map(str::to_owned),
            client_type: credential.client_type().to_owned(),
            thumbprint: credential.thumbprint().to_owned(),
            certificate: base64::engine::general_purpose::STANDARD
                .encode(credential.certificate().as_ref()),
        }
    }
}

/// Authority answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Whether the identity may connect
    pub authenticated: bool,
}

/// [`Authenticator`] backed by an HTTP identity authority.
#[derive(Debug, Clone)]
pub struct RemoteAuthenticator {
    client: reqwest::Client,
    endpoint: Url,
}

impl RemoteAuthenticator {
    /// Create a client for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint is not an http(s) URL or the
    /// HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid authority URL '{endpoint}': {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Authority URL must be http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Authority endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Authenticator for RemoteAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<bool> {
        let body = AuthenticationRequest::from_credential(credential);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let answer: AuthenticationResponse = serde_json::from_slice(&body)?;
                debug!(
                    identity = %credential.identity(),
                    authenticated = answer.authenticated,
                    "Identity authority answered"
                );
                Ok(answer.authenticated)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(identity = %credential.identity(), status = %response.status(), "Identity authority denied");
                Ok(false)
            }
            status => {
                warn!(identity = %credential.identity(), %status, "Identity authority failed");
                Err(Error::Authentication(format!(
                    "identity authority returned {status}"
                )))
            }
        }
    }
}
