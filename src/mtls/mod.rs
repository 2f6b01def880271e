//! Mutual TLS client identity authentication.
//!
//! Every device or module connecting to the gateway presents an X.509 client
//! certificate. The identity it claims is read from the certificate, checked
//! against the hub policy, turned into a [`Credential`](crate::identity::Credential)
//! and handed to an [`Authenticator`](crate::identity::Authenticator) before
//! the handshake is allowed to finish.
//!
//! # Architecture
//!
//! ```text
//! Config
//!   → TransportSettings   (server cert, CA, factory, authenticator, bridge)
//!   → TlsListener         (accept loop)
//!   → TlsTransport        (one per socket, owns a CertAuthVerifier)
//!   → rustls handshake    → verify_client_cert
//!       → HandshakeAuthenticator: capture → parse → validate → credential → authenticate
//!       → WebPKI chain validation
//!   → AuthenticatedPrincipal attached to the TlsConnection
//! ```
//!
//! # Modules
//!
//! - [`bridge`]: runs async authenticators from the synchronous rustls hook
//! - [`cert_manager`]: PEM loading, verifier building and certificate generation
//! - [`handshake`]: per-connection authentication state machine
//! - [`listener`]: accept loop and the [`ConnectionHandler`] seam
//! - [`principal`]: [`AuthenticatedPrincipal`] and [`AuthenticationOutcome`]
//! - [`settings`]: [`TransportSettings`] built once at startup
//! - [`transport`]: [`TlsTransport`] and [`TlsConnection`]
//! - [`verifier`]: the rustls [`ClientCertVerifier`](rustls::server::danger::ClientCertVerifier)
//!
//! # Quick start
//!
//! ```yaml
//! listener:
//!   port: 5671
//! tls:
//!   server_cert: "/etc/edge-gateway/server.crt"
//!   server_key:  "/etc/edge-gateway/server.key"
//!   ca_cert:     "/etc/edge-gateway/ca.crt"
//! auth:
//!   hub_name: "myhub"
//!   authenticator:
//!     kind: registry
//!     identities:
//!       - device_id: "dev1"
//! ```

pub mod bridge;
pub mod cert_manager;
pub mod handshake;
pub mod listener;
pub mod principal;
pub mod settings;
pub mod transport;
pub mod verifier;

pub use bridge::AuthBridge;
pub use cert_manager::{
    CaParams, CertGenerator, DeviceCertParams, GeneratedCert, ServerCertParams,
    build_base_verifier, certified_key, crypto_provider, load_certs, load_private_key,
};
pub use handshake::{
    AuthContext, HandshakeAuthenticator, HandshakeState, RejectReason, ValidatedIdentity,
    validate_identity,
};
pub use listener::{ConnectionHandler, TlsListener};
pub use principal::{AuthenticatedPrincipal, AuthenticationOutcome};
pub use settings::{ClientCertAuth, TransportSettings, TransportSettingsBuilder};
pub use transport::{TlsConnection, TlsTransport};
pub use verifier::CertAuthVerifier;
