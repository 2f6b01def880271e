//! Protocol-agnostic client credentials.
//!
//! A [`Credential`] is what the handshake hands to the identity authority:
//! who the client claims to be plus the certificate material that backs the
//! claim. It owns its certificates; nothing in it borrows from the TLS stack.

use std::fmt;

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// How the client proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Client certificate presented during the TLS handshake.
    X509Certificate,
}

/// A device, or a module running on a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Leaf device connecting on its own behalf.
    Device {
        /// Device id
        device_id: String,
    },
    /// Module hosted by a device.
    Module {
        /// Owning device id
        device_id: String,
        /// Module id
        module_id: String,
    },
}

impl ClientIdentity {
    /// Owning device id (for a device, its own id).
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Device { device_id } | Self::Module { device_id, .. } => device_id,
        }
    }

    /// Module id, when this is a module identity.
    #[must_use]
    pub fn module_id(&self) -> Option<&str> {
        match self {
            Self::Device { .. } => None,
            Self::Module { module_id, .. } => Some(module_id),
        }
    }

    /// Canonical id: `device` or `device/module`.
    #[must_use]
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device { device_id } => write!(f, "{device_id}"),
            Self::Module {
                device_id,
                module_id,
            } => write!(f, "{device_id}/{module_id}"),
        }
    }
}

/// Everything the identity authority needs to decide on a connecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    hub_name: String,
    identity: ClientIdentity,
    client_type: String,
    auth_type: AuthenticationType,
    certificate: CertificateDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    thumbprint: String,
}

impl Credential {
    /// Hub the gateway serves.
    #[must_use]
    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    /// Claimed identity.
    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Client type tag (may be empty).
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    /// Authentication mechanism.
    #[must_use]
    pub fn auth_type(&self) -> AuthenticationType {
        self.auth_type
    }

    /// Leaf certificate.
    #[must_use]
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Presented chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Upper-case hex SHA-256 of the leaf certificate DER.
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }
}

/// SHA-256 thumbprint of a DER certificate, upper-case hex.
#[must_use]
pub fn thumbprint(der: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(der).as_slice())
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Builds [`Credential`]s from a validated identity.
///
/// Shared by every connection, so implementations must be reentrant and must
/// not block.
pub trait CredentialFactory: Send + Sync + fmt::Debug {
    /// Build a credential.
    ///
    /// `chain` is the full presented chain, leaf first.
    fn build(
        &self,
        device_id: &str,
        module_id: Option<&str>,
        client_type: &str,
        certificate: CertificateDer<'static>,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<Credential>;
}

/// Default factory producing X.509 credentials for one hub.
#[derive(Debug, Clone)]
pub struct X509CredentialFactory {
    hub_name: String,
}

impl X509CredentialFactory {
    /// Create a factory for `hub_name`.
    #[must_use]
    pub fn new(hub_name: impl Into<String>) -> Self {
        Self {
            hub_name: hub_name.into(),
        }
    }
}

impl CredentialFactory for X509CredentialFactory {
    fn build(
        &self,
        device_id: &str,
        module_id: Option<&str>,
        client_type: &str,
        certificate: CertificateDer<'static>,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<Credential> {
        if device_id.trim().is_empty() {
            return Err(Error::Credential("device id is blank".to_string()));
        }
        if chain.is_empty() {
            return Err(Error::Credential("certificate chain is empty".to_string()));
        }

        let identity = match module_id {
            None => ClientIdentity::Device {
                device_id: device_id.to_owned(),
            },
            Some(m) if m.trim().is_empty() => {
                return Err(Error::Credential("module id is blank".to_string()));
            }
            Some(m) => ClientIdentity::Module {
                device_id: device_id.to_owned(),
                module_id: m.to_owned(),
            },
        };

        Ok(Credential {
            hub_name: self.hub_name.clone(),
            identity,
            client_type: client_type.to_owned(),
            auth_type: AuthenticationType::X509Certificate,
            thumbprint: thumbprint(&certificate),
            certificate,
            chain,
        })
    }
}
