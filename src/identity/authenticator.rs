//! Identity authorities.
//!
//! The [`Authenticator`] is the secondary credential check that runs after
//! the identity policy has accepted a certificate. One instance is shared by
//! every connection the gateway accepts.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credential::Credential;
use crate::Result;

/// Decides whether a credential is allowed to connect.
///
/// Returning `Err` signals a fault in the authority itself. The handshake
/// treats faults exactly like `Ok(false)`.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Authenticate `credential`.
    async fn authenticate(&self, credential: &Credential) -> Result<bool>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry authenticator
// ─────────────────────────────────────────────────────────────────────────────

/// One identity allowed by a [`RegistryAuthenticator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegisteredIdentity {
    /// Device id
    pub device_id: String,

    /// Module id (absent for device identities)
    pub module_id: Option<String>,

    /// Allowed leaf certificate SHA-256 thumbprints (hex, any case).
    ///
    /// When empty, any certificate that chains to the configured CA is
    /// accepted for this identity.
    pub thumbprints: Vec<String>,
}

impl RegisteredIdentity {
    fn key(&self) -> String {
        match &self.module_id {
            Some(m) => format!("{}/{m}", self.device_id),
            None => self.device_id.clone(),
        }
    }
}

/// Static registry of known identities and their certificate thumbprints.
#[derive(Debug, Default)]
pub struct RegistryAuthenticator {
    identities: HashMap<String, HashSet<String>>,
}

impl RegistryAuthenticator {
    /// Build the registry from configured identities.
    ///
    /// Later entries for the same identity extend the thumbprint set.
    #[must_use]
    pub fn new(identities: &[RegisteredIdentity]) -> Self {
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in identities {
            map.entry(entry.key())
                .or_default()
                .extend(entry.thumbprints.iter().map(|t| t.to_ascii_uppercase()));
        }
        Self { identities: map }
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// `true` when no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl Authenticator for RegistryAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<bool> {
        let id = credential.identity().id();
        let Some(thumbprints) = self.identities.get(&id) else {
            debug!(identity = %id, "Identity not registered");
            return Ok(false);
        };

        if thumbprints.is_empty() {
            return Ok(true);
        }

        let matched = thumbprints.contains(credential.thumbprint());
        if !matched {
            debug!(identity = %id, thumbprint = %credential.thumbprint(), "Thumbprint not registered");
        }
        Ok(matched)
    }
}
