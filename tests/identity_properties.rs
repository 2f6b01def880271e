//! Property tests for identity extraction and the identity policy
//!
//! - Certificates without a device id never authenticate
//! - Module certificates for another hub are rejected, case-insensitively
//! - A module certificate without a hub name is not rejected for it
//! - Subject fields round-trip through certificate generation and parsing

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;
use uuid::Uuid;

use edge_gateway::Result;
use edge_gateway::identity::{Authenticator, CertificateIdentity, Credential, X509CredentialFactory};
use edge_gateway::mtls::{
    AuthBridge, AuthContext, HandshakeAuthenticator, RejectReason, validate_identity,
};

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9._-]{0,15}"
}

fn self_signed(cn: Option<&str>, ou: Option<&str>, o: Option<&str>) -> CertificateDer<'static> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    if let Some(cn) = cn {
        dn.push(DnType::CommonName, cn);
    }
    if let Some(ou) = ou {
        dn.push(DnType::OrganizationalUnitName, ou);
    }
    if let Some(o) = o {
        dn.push(DnType::OrganizationName, o);
    }
    params.distinguished_name = dn;
    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().der().clone()
}

#[derive(Debug, Default)]
struct Counting(AtomicUsize);

#[async_trait]
impl Authenticator for Counting {
    async fn authenticate(&self, _credential: &Credential) -> Result<bool> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

fn machine(hub: &str, auth: Arc<Counting>) -> HandshakeAuthenticator {
    let context = AuthContext::new(
        hub,
        Arc::new(X509CredentialFactory::new(hub)),
        auth,
        Arc::new(AuthBridge::new(1, 4, Duration::from_secs(5)).unwrap()),
    );
    HandshakeAuthenticator::new(Arc::new(context), Uuid::new_v4())
}

/// Flip the ASCII case of the characters selected by `mask`.
fn recase(s: &str, mask: &[bool]) -> String {
    s.chars()
        .zip(mask.iter().cycle())
        .map(|(c, &flip)| {
            if !flip {
                c
            } else if c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn identity_without_device_is_always_rejected(
        module in proptest::option::of(id_strategy()),
        hub in proptest::option::of(id_strategy()),
        configured in id_strategy(),
    ) {
        let identity = CertificateIdentity { hub_name: hub, device_id: None, module_id: module };
        prop_assert!(validate_identity(&identity, &configured).is_err());
    }

    #[test]
    fn mismatched_module_hub_is_rejected(
        device in id_strategy(),
        module in id_strategy(),
        presented in id_strategy(),
        configured in id_strategy(),
    ) {
        prop_assume!(!presented.eq_ignore_ascii_case(&configured));
        let identity = CertificateIdentity {
            hub_name: Some(presented),
            device_id: Some(device),
            module_id: Some(module),
        };
        let is_mismatch = matches!(
            validate_identity(&identity, &configured),
            Err(RejectReason::HubNameMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    #[test]
    fn hub_equal_up_to_case_is_accepted(
        device in id_strategy(),
        module in id_strategy(),
        hub in id_strategy(),
        mask in proptest::collection::vec(any::<bool>(), 1..8),
    ) {
        let identity = CertificateIdentity {
            hub_name: Some(recase(&hub, &mask)),
            device_id: Some(device.clone()),
            module_id: Some(module.clone()),
        };
        let validated = validate_identity(&identity, &hub).unwrap();
        prop_assert_eq!(validated.device_id, device);
        prop_assert_eq!(validated.module_id, Some(module));
    }

    #[test]
    fn missing_hub_name_is_not_a_mismatch(
        device in id_strategy(),
        module in id_strategy(),
        configured in id_strategy(),
    ) {
        let identity = CertificateIdentity {
            hub_name: None,
            device_id: Some(device),
            module_id: Some(module),
        };
        prop_assert!(validate_identity(&identity, &configured).is_ok());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn subject_fields_round_trip(
        device in id_strategy(),
        module in proptest::option::of(id_strategy()),
        hub in proptest::option::of(id_strategy()),
    ) {
        let der = self_signed(Some(&device), module.as_deref(), hub.as_deref());
        let identity = CertificateIdentity::from_der(&der);
        prop_assert_eq!(identity.device_id, Some(device));
        prop_assert_eq!(identity.module_id, module);
        prop_assert_eq!(identity.hub_name, hub);
    }

    #[test]
    fn certificate_without_device_never_reaches_authenticator(
        module in proptest::option::of(id_strategy()),
        hub in proptest::option::of(id_strategy()),
    ) {
        let der = self_signed(None, module.as_deref(), hub.as_deref());
        let auth = Arc::new(Counting::default());
        let mut machine = machine("hub-a", Arc::clone(&auth));

        prop_assert!(!machine.run(Some(&der), &[]));
        prop_assert_eq!(auth.0.load(Ordering::SeqCst), 0);
        prop_assert!(!machine.into_outcome().is_succeeded());
    }

    #[test]
    fn arbitrary_bytes_never_authenticate(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let auth = Arc::new(Counting::default());
        let mut machine = machine("hub-a", Arc::clone(&auth));
        let der = CertificateDer::from(bytes);

        prop_assert!(!machine.run(Some(&der), &[]));
        prop_assert_eq!(auth.0.load(Ordering::SeqCst), 0);
    }
}
