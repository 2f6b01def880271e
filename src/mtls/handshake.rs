//! Connection authentication state machine.
//!
//! One [`HandshakeAuthenticator`] exists per connection. It is driven from the
//! certificate-validation hook and walks a single path:
//!
//! ```text
//! Idle → ChainCaptured → IdentityParsed → Validated → CredentialBuilt
//!      → Authenticating → Authenticated | Rejected
//! ```
//!
//! Every step consumes the previous state, so no step can run before its
//! predecessor completed. `Rejected` and `Authenticated` are terminal; the
//! authenticator is consulted at most once per machine.

use std::fmt;
use std::mem;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::bridge::AuthBridge;
use super::principal::AuthenticationOutcome;
use crate::identity::{Authenticator, CertificateIdentity, Credential, CredentialFactory};

/// Client type tag handed to the credential factory for TLS clients.
const CLIENT_TYPE: &str = "";

// ─────────────────────────────────────────────────────────────────────────────
// Rejection reasons
// ─────────────────────────────────────────────────────────────────────────────

/// Why a handshake was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// The client sent no certificate.
    #[error("no client certificate presented")]
    NoCertificate,

    /// The leaf certificate carries no device id.
    #[error("certificate carries no device id")]
    MissingDeviceId,

    /// A module id without the device that hosts it.
    #[error("module id '{module_id}' presented without a device id")]
    ModuleWithoutDevice {
        /// Module id found in the certificate
        module_id: String,
    },

    /// Module certificate issued for another hub.
    #[error("hub name '{presented}' does not match '{expected}'")]
    HubNameMismatch {
        /// Hub this gateway serves
        expected: String,
        /// Hub named by the certificate
        presented: String,
    },

    /// The credential factory refused the identity.
    #[error("credential could not be built: {0}")]
    CredentialBuild(String),

    /// The authenticator answered `false`.
    #[error("identity authority denied the credential")]
    AuthenticatorDenied,

    /// The authenticator failed, panicked or timed out.
    #[error("identity authority fault: {0}")]
    AuthenticatorFault(String),

    /// The TLS library's own chain validation failed.
    #[error("certificate chain rejected: {0}")]
    CertificateInvalid(String),

    /// A step was driven in the wrong order, e.g. validation ran twice.
    #[error("handshake step out of order")]
    OutOfOrder,
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity policy
// ─────────────────────────────────────────────────────────────────────────────

/// Identity that passed the policy checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIdentity {
    /// Device id
    pub device_id: String,
    /// Module id, for module identities
    pub module_id: Option<String>,
}

/// Apply the identity policy to a parsed certificate identity.
///
/// - a device id is required
/// - a module id without a device id is refused
/// - when a module certificate names a hub, it must be `hub_name`
///   (ASCII case-insensitive); a missing hub name is accepted
///
/// # Errors
///
/// Returns the [`RejectReason`] for the first violated rule.
pub fn validate_identity(
    identity: &CertificateIdentity,
    hub_name: &str,
) -> Result<ValidatedIdentity, RejectReason> {
    let Some(device_id) = identity.device_id.clone() else {
        return Err(match &identity.module_id {
            Some(module_id) => RejectReason::ModuleWithoutDevice {
                module_id: module_id.clone(),
            },
            None => RejectReason::MissingDeviceId,
        });
    };

    if let (Some(_), Some(presented)) = (&identity.module_id, &identity.hub_name) {
        if !presented.eq_ignore_ascii_case(hub_name) {
            return Err(RejectReason::HubNameMismatch {
                expected: hub_name.to_owned(),
                presented: presented.clone(),
            });
        }
    }

    Ok(ValidatedIdentity {
        device_id,
        module_id: identity.module_id.clone(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared context
// ─────────────────────────────────────────────────────────────────────────────

/// Dependencies shared by every connection's state machine.
///
/// Built once at startup; read-only afterwards.
#[derive(Debug)]
pub struct AuthContext {
    hub_name: String,
    factory: Arc<dyn CredentialFactory>,
    authenticator: Arc<dyn Authenticator>,
    bridge: Arc<AuthBridge>,
}

impl AuthContext {
    /// Bundle the authentication dependencies.
    #[must_use]
    pub fn new(
        hub_name: impl Into<String>,
        factory: Arc<dyn CredentialFactory>,
        authenticator: Arc<dyn Authenticator>,
        bridge: Arc<AuthBridge>,
    ) -> Self {
        Self {
            hub_name: hub_name.into(),
            factory,
            authenticator,
            bridge,
        }
    }

    /// Hub this gateway serves.
    #[must_use]
    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    /// Shared authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// Shared credential factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn CredentialFactory> {
        &self.factory
    }

    /// Blocking bridge the authenticator runs on.
    #[must_use]
    pub fn bridge(&self) -> &Arc<AuthBridge> {
        &self.bridge
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// States
// ─────────────────────────────────────────────────────────────────────────────

/// Where a connection's authentication currently stands.
#[derive(Debug, Default)]
pub enum HandshakeState {
    /// Nothing seen yet.
    #[default]
    Idle,
    /// Owned copy of the presented chain, leaf first.
    ChainCaptured {
        /// Presented chain
        chain: Vec<CertificateDer<'static>>,
    },
    /// Leaf certificate parsed.
    IdentityParsed {
        /// Presented chain
        chain: Vec<CertificateDer<'static>>,
        /// Parsed identity
        identity: CertificateIdentity,
    },
    /// Identity passed policy.
    Validated {
        /// Presented chain
        chain: Vec<CertificateDer<'static>>,
        /// Accepted identity
        identity: ValidatedIdentity,
    },
    /// Credential ready for the authenticator.
    CredentialBuilt {
        /// Credential to authenticate
        credential: Credential,
    },
    /// Waiting on the authenticator.
    Authenticating,
    /// Terminal: the authenticator accepted the credential.
    Authenticated {
        /// Authenticated credential
        credential: Credential,
    },
    /// Terminal: the handshake must fail.
    Rejected {
        /// Why
        reason: RejectReason,
    },
}

impl HandshakeState {
    /// Short state name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChainCaptured { .. } => "chain_captured",
            Self::IdentityParsed { .. } => "identity_parsed",
            Self::Validated { .. } => "validated",
            Self::CredentialBuilt { .. } => "credential_built",
            Self::Authenticating => "authenticating",
            Self::Authenticated { .. } => "authenticated",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// `true` for `Authenticated` and `Rejected`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated { .. } | Self::Rejected { .. })
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Per-connection authentication state machine.
#[derive(Debug)]
pub struct HandshakeAuthenticator {
    context: Arc<AuthContext>,
    connection_id: Uuid,
    state: HandshakeState,
}

impl HandshakeAuthenticator {
    /// Fresh machine in `Idle`.
    #[must_use]
    pub fn new(context: Arc<AuthContext>, connection_id: Uuid) -> Self {
        Self {
            context,
            connection_id,
            state: HandshakeState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Rejection reason, once rejected.
    #[must_use]
    pub fn rejection(&self) -> Option<&RejectReason> {
        match &self.state {
            HandshakeState::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    /// `true` once the authenticator accepted the credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, HandshakeState::Authenticated { .. })
    }

    /// `Idle → ChainCaptured`, copying the presented chain into owned storage.
    ///
    /// `None` or an empty leaf means no certificate was presented.
    pub fn capture_chain(
        &mut self,
        end_entity: Option<&CertificateDer<'_>>,
        intermediates: &[CertificateDer<'_>],
    ) {
        if !matches!(self.state, HandshakeState::Idle) {
            self.transition(
                self.state.name(),
                HandshakeState::Rejected {
                    reason: RejectReason::OutOfOrder,
                },
            );
            return;
        }

        let next = match end_entity {
            Some(leaf) if !leaf.is_empty() => {
                let chain = std::iter::once(leaf)
                    .chain(intermediates)
                    .map(|cert| cert.clone().into_owned())
                    .collect();
                HandshakeState::ChainCaptured { chain }
            }
            _ => HandshakeState::Rejected {
                reason: RejectReason::NoCertificate,
            },
        };
        self.transition(self.state.name(), next);
    }

    /// Perform the next transition. Terminal states are left untouched.
    pub fn advance(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        let from = self.state.name();
        let state = mem::replace(&mut self.state, HandshakeState::Authenticating);
        let next = match state {
            HandshakeState::ChainCaptured { chain } => {
                let identity = chain
                    .first()
                    .map(|leaf| CertificateIdentity::from_der(leaf))
                    .unwrap_or_default();
                HandshakeState::IdentityParsed { chain, identity }
            }
            HandshakeState::IdentityParsed { chain, identity } => {
                match validate_identity(&identity, &self.context.hub_name) {
                    Ok(identity) => HandshakeState::Validated { chain, identity },
                    Err(reason) => HandshakeState::Rejected { reason },
                }
            }
            HandshakeState::Validated { chain, identity } => self.build_credential(chain, &identity),
            HandshakeState::CredentialBuilt { credential } => self.authenticate(credential),
            HandshakeState::Idle
            | HandshakeState::Authenticating
            | HandshakeState::Authenticated { .. }
            | HandshakeState::Rejected { .. } => HandshakeState::Rejected {
                reason: RejectReason::OutOfOrder,
            },
        };
        self.transition(from, next);
    }

    /// Capture the chain and advance until a terminal state is reached.
    ///
    /// Returns `true` only for `Authenticated`.
    pub fn run(
        &mut self,
        end_entity: Option<&CertificateDer<'_>>,
        intermediates: &[CertificateDer<'_>],
    ) -> bool {
        self.capture_chain(end_entity, intermediates);
        while !self.state.is_terminal() {
            self.advance();
        }
        self.is_authenticated()
    }

    /// Force `Rejected`, discarding any authenticated credential.
    ///
    /// Used when the TLS library's own validation fails after identity
    /// authentication succeeded.
    pub fn reject(&mut self, reason: RejectReason) {
        self.transition(self.state.name(), HandshakeState::Rejected { reason });
    }

    /// Consume the machine into its outcome.
    ///
    /// Anything but `Authenticated` yields a failed outcome.
    #[must_use]
    pub fn into_outcome(self) -> AuthenticationOutcome {
        match self.state {
            HandshakeState::Authenticated { credential } => {
                AuthenticationOutcome::succeeded(credential)
            }
            _ => AuthenticationOutcome::failed(),
        }
    }

    fn build_credential(
        &self,
        chain: Vec<CertificateDer<'static>>,
        identity: &ValidatedIdentity,
    ) -> HandshakeState {
        let Some(leaf) = chain.first().cloned() else {
            return HandshakeState::Rejected {
                reason: RejectReason::NoCertificate,
            };
        };

        match self.context.factory.build(
            &identity.device_id,
            identity.module_id.as_deref(),
            CLIENT_TYPE,
            leaf,
            chain,
        ) {
            Ok(credential) => HandshakeState::CredentialBuilt { credential },
            Err(e) => HandshakeState::Rejected {
                reason: RejectReason::CredentialBuild(e.to_string()),
            },
        }
    }

    /// Block on the authenticator through the bridge.
    fn authenticate(&self, credential: Credential) -> HandshakeState {
        let authenticator = Arc::clone(&self.context.authenticator);
        let answer = self.context.bridge.run(async move {
            let verdict = authenticator.authenticate(&credential).await;
            (credential, verdict)
        });

        match answer {
            Ok((credential, Ok(true))) => HandshakeState::Authenticated { credential },
            Ok((_, Ok(false))) => HandshakeState::Rejected {
                reason: RejectReason::AuthenticatorDenied,
            },
            Ok((_, Err(e))) | Err(e) => {
                if !e.is_authentication_fault() {
                    error!(connection_id = %self.connection_id, error = %e, "Authentication bridge failed");
                }
                HandshakeState::Rejected {
                    reason: RejectReason::AuthenticatorFault(e.to_string()),
                }
            }
        }
    }

    fn transition(&mut self, from: &'static str, next: HandshakeState) {
        if let HandshakeState::Rejected { reason } = &next {
            warn!(connection_id = %self.connection_id, from, %reason, "Client authentication rejected");
        } else {
            debug!(connection_id = %self.connection_id, from, to = next.name(), "Handshake state");
        }
        self.state = next;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
