//! Certificate identity extraction.
//!
//! Reads the device/module identity a client certificate claims. The
//! identity lives in the leaf certificate's Subject DN:
//!
//! | Attribute | Field |
//! |-----------|-------|
//! | `CN` (commonName) | device id |
//! | `OU` (organizationalUnitName) | module id |
//! | `O` (organizationName) | hub name |
//!
//! Only the first occurrence of each attribute counts. Values are trimmed and
//! empty values are treated as absent.
//!
//! Parsing is total: DER that `x509-parser` cannot read yields an identity with
//! every field absent, which the handshake policy then rejects.

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::AttributeTypeAndValue;

// ─────────────────────────────────────────────────────────────────────────────
// Certificate identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity fields claimed by a client certificate.
///
/// Produced fresh for every handshake and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateIdentity {
    /// Hub the module claims to belong to (`O`).
    pub hub_name: Option<String>,

    /// Device id (`CN`).
    pub device_id: Option<String>,

    /// Module id (`OU`).
    pub module_id: Option<String>,
}

impl CertificateIdentity {
    /// Parse a DER-encoded leaf certificate.
    ///
    /// Never fails; unreadable input produces [`CertificateIdentity::default`].
    #[must_use]
    pub fn from_der(der: &[u8]) -> Self {
        match X509Certificate::from_der(der) {
            Ok((_, cert)) => Self::from_certificate(&cert),
            Err(e) => {
                tracing::debug!(error = %e, "Client certificate is not parseable, identity left empty");
                Self::default()
            }
        }
    }

    /// Extract identity fields from an already parsed certificate.
    #[must_use]
    pub fn from_certificate(cert: &X509Certificate<'_>) -> Self {
        let subject = cert.subject();
        Self {
            hub_name: first_value(subject.iter_organization()),
            device_id: first_value(subject.iter_common_name()),
            module_id: first_value(subject.iter_organizational_unit()),
        }
    }

    /// `true` when no identity field is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hub_name.is_none() && self.device_id.is_none() && self.module_id.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First attribute of a kind, as a trimmed, non-empty string.
fn first_value<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    /// Self-signed DER cert with the given subject attributes.
    fn make_cert_der(cn: Option<&str>, ou: Option<&str>, o: Option<&str>) -> Vec<u8> {
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

        let key_pair = KeyPair::generate().expect("key generation failed");
        let cert = params
            .self_signed(&key_pair)
            .expect("rcgen cert generation failed");
        cert.der().to_vec()
    }

    #[test]
    fn device_certificate_has_only_device_id() {
        // GIVEN: CN=dev1 and nothing else
        let der = make_cert_der(Some("dev1"), None, None);
        // WHEN: parsing
        let id = CertificateIdentity::from_der(&der);
        // THEN: only the device id is present
        assert_eq!(id.device_id.as_deref(), Some("dev1"));
        assert!(id.module_id.is_none());
        assert!(id.hub_name.is_none());
    }

    #[test]
    fn module_certificate_has_all_fields() {
        let der = make_cert_der(Some("dev1"), Some("mod1"), Some("hub-a"));
        let id = CertificateIdentity::from_der(&der);
        assert_eq!(
            id,
            CertificateIdentity {
                hub_name: Some("hub-a".into()),
                device_id: Some("dev1".into()),
                module_id: Some("mod1".into()),
            }
        );
    }

    #[test]
    fn module_without_device_is_reported_as_is() {
        // The parser does not enforce policy; it only reports what is there.
        let der = make_cert_der(None, Some("mod1"), None);
        let id = CertificateIdentity::from_der(&der);
        assert!(id.device_id.is_none());
        assert_eq!(id.module_id.as_deref(), Some("mod1"));
    }

    #[test]
    fn blank_values_are_absent() {
        let der = make_cert_der(Some("   "), Some(""), Some(" hub "));
        let id = CertificateIdentity::from_der(&der);
        assert!(id.device_id.is_none());
        assert!(id.module_id.is_none());
        assert_eq!(id.hub_name.as_deref(), Some("hub"));
    }

    #[test]
    fn empty_subject_yields_empty_identity() {
        let der = make_cert_der(None, None, None);
        assert!(CertificateIdentity::from_der(&der).is_empty());
    }

    #[test]
    fn garbage_bytes_yield_empty_identity() {
        let id = CertificateIdentity::from_der(b"not a cert");
        assert!(id.is_empty());
    }

    #[test]
    fn parsing_is_deterministic() {
        let der = make_cert_der(Some("dev1"), Some("mod1"), Some("hub"));
        assert_eq!(
            CertificateIdentity::from_der(&der),
            CertificateIdentity::from_der(&der)
        );
    }
}
