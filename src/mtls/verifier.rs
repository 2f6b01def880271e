//! Certificate-validation hook handed to rustls.
//!
//! A [`CertAuthVerifier`] is created for exactly one connection. rustls calls
//! [`ClientCertVerifier::verify_client_cert`] once per handshake; the verifier
//! drives that connection's [`HandshakeAuthenticator`], then runs the WebPKI
//! chain validation, and parks the resulting [`AuthenticationOutcome`] until
//! the transport creates the principal. A failed CertificateVerify signature
//! afterwards replaces the parked outcome with a failed one.

use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tracing::warn;
use uuid::Uuid;

use super::handshake::{AuthContext, HandshakeAuthenticator, RejectReason};
use super::principal::AuthenticationOutcome;

#[derive(Debug, Default)]
struct Slot {
    machine: Option<HandshakeAuthenticator>,
    outcome: Option<AuthenticationOutcome>,
    rejection: Option<RejectReason>,
}

/// Per-connection client certificate verifier.
#[derive(Debug)]
pub struct CertAuthVerifier {
    base: Arc<dyn ClientCertVerifier>,
    slot: Mutex<Slot>,
}

impl CertAuthVerifier {
    /// Verifier for one connection.
    ///
    /// `base` performs the TLS library's own chain and policy validation.
    #[must_use]
    pub fn new(
        context: Arc<AuthContext>,
        base: Arc<dyn ClientCertVerifier>,
        connection_id: Uuid,
    ) -> Self {
        Self {
            base,
            slot: Mutex::new(Slot {
                machine: Some(HandshakeAuthenticator::new(context, connection_id)),
                ..Slot::default()
            }),
        }
    }

    /// Take the outcome captured during validation.
    ///
    /// Returns `None` before validation ran and on every call after the first.
    #[must_use]
    pub fn take_outcome(&self) -> Option<AuthenticationOutcome> {
        self.slot.lock().outcome.take()
    }

    /// Why validation rejected the client, if it did.
    #[must_use]
    pub fn rejection(&self) -> Option<RejectReason> {
        self.slot.lock().rejection.clone()
    }

    /// Drop a stored outcome once the client failed to prove it holds the
    /// certificate's key.
    fn discard(&self, error: &rustls::Error) {
        let mut slot = self.slot.lock();
        slot.outcome = Some(AuthenticationOutcome::failed());
        slot.rejection = Some(RejectReason::CertificateInvalid(error.to_string()));
        warn!(%error, "Client signature rejected; authenticated identity discarded");
    }

    fn finish(&self, machine: HandshakeAuthenticator) {
        let mut slot = self.slot.lock();
        slot.rejection = machine.rejection().cloned();
        slot.outcome = Some(machine.into_outcome());
    }
}

fn application_failure() -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
}

impl ClientCertVerifier for CertAuthVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.base.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        // The lock is not held while the authenticator runs.
        let taken = self.slot.lock().machine.take();
        let Some(mut machine) = taken else {
            let mut slot = self.slot.lock();
            slot.rejection = Some(RejectReason::OutOfOrder);
            slot.outcome = Some(AuthenticationOutcome::failed());
            return Err(application_failure());
        };

        if !machine.run(Some(end_entity), intermediates) {
            self.finish(machine);
            return Err(application_failure());
        }

        match self.base.verify_client_cert(end_entity, intermediates, now) {
            Ok(verified) => {
                self.finish(machine);
                Ok(verified)
            }
            Err(e) => {
                machine.reject(RejectReason::CertificateInvalid(e.to_string()));
                self.finish(machine);
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.base
            .verify_tls12_signature(message, cert, dss)
            .inspect_err(|e| self.discard(e))
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.base
            .verify_tls13_signature(message, cert, dss)
            .inspect_err(|e| self.discard(e))
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.base.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::identity::{Authenticator, Credential, X509CredentialFactory};
    use crate::mtls::bridge::AuthBridge;
    use crate::mtls::cert_manager::{
        CaParams, CertGenerator, DeviceCertParams, GeneratedCert, build_base_verifier,
        crypto_provider,
    };

    #[derive(Debug)]
    struct Accept(bool);

    #[async_trait]
    impl Authenticator for Accept {
        async fn authenticate(&self, _credential: &Credential) -> crate::Result<bool> {
            Ok(self.0)
        }
    }

    fn ca() -> GeneratedCert {
        CertGenerator::init_ca(&CaParams {
            cn: "Verifier Test CA",
            validity_days: 30,
        })
        .unwrap()
    }

    fn device(ca: &GeneratedCert, device_id: &str) -> CertificateDer<'static> {
        CertGenerator::issue_device(
            &DeviceCertParams {
                device_id,
                module_id: None,
                hub_name: None,
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap()
        .cert_der()
        .unwrap()
    }

    fn verifier(trusted: &GeneratedCert, accept: bool) -> CertAuthVerifier {
        let context = Arc::new(AuthContext::new(
            "hub-a",
            Arc::new(X509CredentialFactory::new("hub-a")),
            Arc::new(Accept(accept)),
            Arc::new(AuthBridge::new(1, 2, Duration::from_secs(5)).unwrap()),
        ));
        let base =
            build_base_verifier(vec![trusted.cert_der().unwrap()], Vec::new(), crypto_provider())
                .unwrap();
        CertAuthVerifier::new(context, base, Uuid::new_v4())
    }

    #[test]
    fn accepted_identity_with_valid_chain_succeeds() {
        let ca = ca();
        let verifier = verifier(&ca, true);
        let leaf = device(&ca, "dev1");

        assert!(verifier.verify_client_cert(&leaf, &[], UnixTime::now()).is_ok());

        let outcome = verifier.take_outcome().unwrap();
        assert_eq!(outcome.identity().unwrap().identity().id(), "dev1");
        assert!(verifier.take_outcome().is_none());
        assert!(verifier.rejection().is_none());
    }

    #[test]
    fn denied_identity_fails_with_application_error() {
        let ca = ca();
        let verifier = verifier(&ca, false);
        let leaf = device(&ca, "dev1");

        let err = verifier
            .verify_client_cert(&leaf, &[], UnixTime::now())
            .unwrap_err();
        assert_eq!(err, application_failure());
        assert_eq!(verifier.rejection(), Some(RejectReason::AuthenticatorDenied));
        assert!(!verifier.take_outcome().unwrap().is_succeeded());
    }

    #[test]
    fn base_validation_failure_discards_authenticated_identity() {
        // GIVEN: the authenticator accepts, but the leaf is from an untrusted CA
        let trusted = ca();
        let other = ca();
        let verifier = verifier(&trusted, true);
        let leaf = device(&other, "dev1");

        // WHEN: validating
        let result = verifier.verify_client_cert(&leaf, &[], UnixTime::now());

        // THEN: the handshake fails and no identity survives
        assert!(result.is_err());
        assert!(matches!(
            verifier.rejection(),
            Some(RejectReason::CertificateInvalid(_))
        ));
        assert!(verifier.take_outcome().unwrap().identity().is_none());
    }

    #[test]
    fn second_validation_is_rejected() {
        let ca = ca();
        let verifier = verifier(&ca, true);
        let leaf = device(&ca, "dev1");

        assert!(verifier.verify_client_cert(&leaf, &[], UnixTime::now()).is_ok());
        assert!(verifier.verify_client_cert(&leaf, &[], UnixTime::now()).is_err());
        assert_eq!(verifier.rejection(), Some(RejectReason::OutOfOrder));
    }

    #[test]
    fn credential_survives_source_buffer_reuse() {
        // GIVEN: a leaf borrowed from a buffer that is overwritten after the hook
        let ca = ca();
        let verifier = verifier(&ca, true);
        let original = device(&ca, "dev1").to_vec();
        let mut buffer = original.clone();

        {
            let borrowed = CertificateDer::from(buffer.as_slice());
            assert!(verifier.verify_client_cert(&borrowed, &[], UnixTime::now()).is_ok());
        }
        buffer.fill(0);

        // THEN: the credential still holds the original bytes
        let outcome = verifier.take_outcome().unwrap();
        let cred = outcome.identity().unwrap();
        assert_eq!(cred.certificate().as_ref(), original.as_slice());
        assert_eq!(cred.chain()[0].as_ref(), original.as_slice());
    }
}
