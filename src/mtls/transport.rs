//! Per-connection TLS transport.
//!
//! [`TlsTransport`] is created for one accepted socket and never reused. It
//! owns that connection's [`CertAuthVerifier`], runs the TLS handshake and
//! turns the captured authentication outcome into an
//! [`AuthenticatedPrincipal`].

use std::sync::Arc;

use rustls::server::danger::ClientCertVerifier;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handshake::RejectReason;
use super::principal::AuthenticatedPrincipal;
use super::settings::TransportSettings;
use super::verifier::CertAuthVerifier;
use crate::{Error, Result};

/// TLS wrapper for one connection.
#[derive(Debug)]
pub struct TlsTransport {
    settings: Arc<TransportSettings>,
    connection_id: Uuid,
    verifier: Option<Arc<CertAuthVerifier>>,
}

impl TlsTransport {
    /// Wrapper for a freshly accepted socket.
    #[must_use]
    pub fn new(settings: Arc<TransportSettings>) -> Self {
        let connection_id = Uuid::new_v4();
        let verifier = settings
            .client_auth()
            .map(|auth| auth.verifier_for(connection_id));
        Self {
            settings,
            connection_id,
            verifier,
        }
    }

    /// Id used in this connection's logs.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Why client authentication rejected the handshake, if it did.
    #[must_use]
    pub fn rejection(&self) -> Option<RejectReason> {
        self.verifier.as_ref().and_then(|v| v.rejection())
    }

    /// Principal for the authenticated client.
    ///
    /// Takes the outcome captured during certificate validation; a second
    /// call returns `None`. Also `None` when client certificate auth is off.
    #[must_use]
    pub fn create_principal(&self) -> Option<AuthenticatedPrincipal> {
        let outcome = self.verifier.as_ref()?.take_outcome()?;
        outcome
            .is_succeeded()
            .then(|| AuthenticatedPrincipal::new(outcome))
    }

    /// A failed handshake never leaves a principal behind, whatever the
    /// verifier recorded before the failure.
    fn discard_outcome(&self) {
        if let Some(verifier) = &self.verifier {
            let _ = verifier.take_outcome();
        }
    }

    /// Run the TLS handshake over `io`.
    ///
    /// Call once per transport; [`rejection`](Self::rejection) explains a
    /// refused client afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` if the handshake fails, times out, or client
    /// authentication did not produce a principal.
    pub async fn accept<IO>(&self, io: IO) -> Result<TlsConnection<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let verifier = self
            .verifier
            .clone()
            .map(|v| v as Arc<dyn ClientCertVerifier>);
        let acceptor = TlsAcceptor::from(self.settings.server_config(verifier)?);
        let timeout = self.settings.handshake_timeout();

        debug!(connection_id = %self.connection_id, "TLS handshake started");

        let stream = match tokio::time::timeout(timeout, acceptor.accept(io)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.discard_outcome();
                let reason = self
                    .rejection()
                    .map_or_else(|| e.to_string(), |reason| reason.to_string());
                warn!(connection_id = %self.connection_id, %reason, "TLS handshake failed");
                return Err(Error::Handshake(reason));
            }
            Err(_) => {
                self.discard_outcome();
                warn!(connection_id = %self.connection_id, ?timeout, "TLS handshake timed out");
                return Err(Error::Handshake(format!(
                    "handshake timed out after {timeout:?}"
                )));
            }
        };

        let principal = self.create_principal();
        if self.verifier.is_some() && principal.is_none() {
            warn!(connection_id = %self.connection_id, "Handshake completed without an authenticated identity");
            return Err(Error::Handshake(
                "client certificate authentication produced no principal".to_string(),
            ));
        }

        match principal.as_ref().and_then(AuthenticatedPrincipal::credential) {
            Some(credential) => info!(
                connection_id = %self.connection_id,
                identity = %credential.identity(),
                "Client authenticated"
            ),
            None => info!(connection_id = %self.connection_id, "TLS connection established"),
        }

        Ok(TlsConnection {
            stream,
            principal,
            connection_id: self.connection_id,
        })
    }
}

/// Established connection handed to the protocol layer.
#[derive(Debug)]
pub struct TlsConnection<IO> {
    stream: TlsStream<IO>,
    principal: Option<AuthenticatedPrincipal>,
    connection_id: Uuid,
}

impl<IO> TlsConnection<IO> {
    /// Connection id used in logs.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Authenticated principal; `None` when client certificate auth is off.
    #[must_use]
    pub fn principal(&self) -> Option<&AuthenticatedPrincipal> {
        self.principal.as_ref()
    }

    /// The TLS stream.
    pub fn stream_mut(&mut self) -> &mut TlsStream<IO> {
        &mut self.stream
    }

    /// Split into stream and principal.
    #[must_use]
    pub fn into_parts(self) -> (TlsStream<IO>, Option<AuthenticatedPrincipal>) {
        (self.stream, self.principal)
    }
}
