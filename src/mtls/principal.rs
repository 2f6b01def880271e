//! Authenticated principal attached to an accepted connection.

use crate::identity::Credential;

/// Result of authenticating one handshake.
///
/// Either failed with no identity, or succeeded with the credential that was
/// authenticated. The fields are private so the "succeeded without identity"
/// state cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationOutcome {
    identity: Option<Credential>,
}

impl AuthenticationOutcome {
    /// Successful outcome carrying the authenticated credential.
    #[must_use]
    pub fn succeeded(credential: Credential) -> Self {
        Self {
            identity: Some(credential),
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failed() -> Self {
        Self { identity: None }
    }

    /// Whether authentication succeeded.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.identity.is_some()
    }

    /// The authenticated credential, present iff succeeded.
    #[must_use]
    pub fn identity(&self) -> Option<&Credential> {
        self.identity.as_ref()
    }
}

/// Security context of an accepted connection.
///
/// Created once per connection after a successful handshake and only ever
/// read by downstream authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    outcome: AuthenticationOutcome,
}

impl AuthenticatedPrincipal {
    /// Wrap an outcome.
    #[must_use]
    pub fn new(outcome: AuthenticationOutcome) -> Self {
        Self { outcome }
    }

    /// The handshake's authentication outcome.
    #[must_use]
    pub fn outcome(&self) -> &AuthenticationOutcome {
        &self.outcome
    }

    /// Shortcut for `outcome().identity()`.
    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.outcome.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CredentialFactory, X509CredentialFactory};
    use rustls::pki_types::CertificateDer;

    #[test]
    fn failed_outcome_has_no_identity() {
        let outcome = AuthenticationOutcome::failed();
        assert!(!outcome.is_succeeded());
        assert!(outcome.identity().is_none());
    }

    #[test]
    fn principal_exposes_credential() {
        let leaf = CertificateDer::from(b"leaf".to_vec());
        let cred = X509CredentialFactory::new("hub")
            .build("dev1", None, "", leaf.clone(), vec![leaf])
            .unwrap();
        let principal = AuthenticatedPrincipal::new(AuthenticationOutcome::succeeded(cred.clone()));

        assert!(principal.outcome().is_succeeded());
        assert_eq!(principal.credential(), Some(&cred));
    }
}
