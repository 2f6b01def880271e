//! Certificate management: loading, verifier building, and CLI helpers.
//!
//! Provides:
//! - [`crypto_provider`]: the single rustls crypto provider the gateway uses
//! - [`load_certs`] / [`load_private_key`] / [`load_crls`]: PEM file loading
//! - [`build_base_verifier`]: WebPKI client chain verification (CA + CRL)
//! - [`certified_key`]: server certificate + key for the TLS resolver
//! - [`CertGenerator`]: `rcgen`-backed generation for `edge-gateway tls` commands
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, date_time_ymd,
};
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::ClientCertVerifier;
use rustls::sign::CertifiedKey;
use tracing::debug;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: crypto provider
// ─────────────────────────────────────────────────────────────────────────────

/// The aws-lc-rs provider used for every TLS config the gateway builds.
///
/// Passed explicitly so a second provider pulled in by another crate can
/// never make config building ambiguous.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data)
        .map_err(|e| Error::Certificate(format!("Failed to parse certs from '{path}': {e}")))
}

/// Parse all certificates from in-memory PEM.
///
/// # Errors
///
/// Returns an error if a PEM block is malformed or there are none.
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?;

    if certs.is_empty() {
        return Err(Error::Certificate("no certificates found".to_string()));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA, PKCS#8 and SEC1 EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no private key.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    parse_private_key(&pem_data)
        .map_err(|e| Error::Certificate(format!("Failed to parse private key from '{path}': {e}")))
}

/// Parse the first private key from in-memory PEM.
///
/// # Errors
///
/// Returns an error if the PEM is malformed or contains no key.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?
        .ok_or_else(|| Error::Certificate("no private key found".to_string()))
}

/// Load CRL entries from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a CRL block is malformed.
pub fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::crls(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("Failed to parse CRL from '{path}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: verifier and server key
// ─────────────────────────────────────────────────────────────────────────────

/// Build the WebPKI client verifier that checks chains against `ca_certs`.
///
/// This is the TLS library's own chain/policy validation. It runs after the
/// identity has been authenticated and can still fail the handshake.
///
/// # Errors
///
/// Returns `Error::Config` if a CA certificate cannot be added or the
/// verifier cannot be built (e.g. empty trust store).
pub fn build_base_verifier(
    ca_certs: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn ClientCertVerifier>> {
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| Error::Config(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let crl_count = crls.len();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider)
        .with_crls(crls)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;

    debug!(crls = crl_count, "Client chain verifier built");
    Ok(verifier)
}

/// Pair the server certificate chain with its signing key.
///
/// # Errors
///
/// Returns `Error::Config` if the chain is empty or the key is unsupported.
pub fn certified_key(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    provider: &CryptoProvider,
) -> Result<Arc<CertifiedKey>> {
    if chain.is_empty() {
        return Err(Error::Config("server certificate chain is empty".to_string()));
    }
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| Error::Config(format!("Unsupported server private key: {e}")))?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation (CLI helpers)
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the CA (e.g. `"Edge Gateway Root CA"`).
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Parameters for the gateway's own TLS server certificate.
#[derive(Debug)]
pub struct ServerCertParams<'a> {
    /// Common Name.
    pub cn: &'a str,
    /// Subject Alternative Names: DNS entries.
    pub san_dns: Vec<String>,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Parameters for a device or module client certificate.
///
/// Encoded as `CN=device_id`, `OU=module_id`, `O=hub_name`.
#[derive(Debug)]
pub struct DeviceCertParams<'a> {
    /// Device id (CN).
    pub device_id: &'a str,
    /// Module id (OU), for module identities.
    pub module_id: Option<&'a str>,
    /// Hub name (O).
    pub hub_name: Option<&'a str>,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug, Clone)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl GeneratedCert {
    /// The certificate as DER.
    ///
    /// # Errors
    ///
    /// Returns an error if `cert_pem` does not hold a certificate.
    pub fn cert_der(&self) -> Result<CertificateDer<'static>> {
        parse_certs(self.cert_pem.as_bytes())?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Certificate("no certificate in PEM".to_string()))
    }

    /// The private key as DER.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_pem` does not hold a private key.
    pub fn key_der(&self) -> Result<PrivateKeyDer<'static>> {
        parse_private_key(self.key_pem.as_bytes())
    }
}

/// Certificate generator backed by `rcgen`.
///
/// Generates CA, server and device certificates without `openssl`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed root CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("Failed to generate CA key: {e}")))?;

        let ca_params = ca_params(params.cn, params.validity_days)?;
        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Certificate(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue an intermediate CA signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer cannot be parsed or signing fails.
    pub fn issue_intermediate(
        params: &CaParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let leaf_params = ca_params(params.cn, params.validity_days)?;
        sign_with(&leaf_params, ca_cert_pem, ca_key_pem)
    }

    /// Issue the gateway's TLS server certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if a SAN is not valid IA5, the issuer cannot be
    /// parsed, or signing fails.
    pub fn issue_server(
        params: &ServerCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;
        leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Certificate(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        leaf_params.subject_alt_names = sans;

        sign_with(&leaf_params, ca_cert_pem, ca_key_pem)
    }

    /// Issue a device or module client certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer cannot be parsed or signing fails.
    pub fn issue_device(
        params: &DeviceCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.device_id);
        if let Some(module_id) = params.module_id {
            dn.push(DnType::OrganizationalUnitName, module_id);
        }
        if let Some(hub_name) = params.hub_name {
            dn.push(DnType::OrganizationName, hub_name);
        }
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;
        leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        sign_with(&leaf_params, ca_cert_pem, ca_key_pem)
    }

    /// Write a [`GeneratedCert`] to disk.
    ///
    /// Writes `<stem>.crt` and `<stem>.key` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| {
            Error::Certificate(format!("Cannot create dir '{}': {e}", dir.display()))
        })?;

        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)
            .map_err(|e| Error::Certificate(format!("Cannot write cert: {e}")))?;

        fs::write(dir.join(format!("{stem}.key")), &cert.key_pem)
            .map_err(|e| Error::Certificate(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Certificate(format!("Cannot read '{path}': {e}")))
}

fn ca_params(cn: &str, validity_days: u32) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_after = validity_to_date(validity_days)?;
    Ok(params)
}

/// Sign `params` with a freshly generated key, issued by the given CA.
fn sign_with(
    params: &CertificateParams,
    ca_cert_pem: &str,
    ca_key_pem: &str,
) -> Result<GeneratedCert> {
    let ca_key = KeyPair::from_pem(ca_key_pem)
        .map_err(|e| Error::Certificate(format!("Failed to parse CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
        .map_err(|e| Error::Certificate(format!("Failed to parse CA cert: {e}")))?;

    let leaf_key = KeyPair::generate()
        .map_err(|e| Error::Certificate(format!("Failed to generate key: {e}")))?;
    let cert = params
        .signed_by(&leaf_key, &issuer)
        .map_err(|e| Error::Certificate(format!("Certificate signing failed: {e}")))?;

    Ok(GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: leaf_key.serialize_pem(),
    })
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Certificate(format!("System time error: {e}")))?
        .as_secs();

    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(
        i64::try_from(future_secs).unwrap_or(i64::MAX),
    )
    .map_err(|e| Error::Certificate(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::CertificateIdentity;

    fn test_ca() -> GeneratedCert {
        CertGenerator::init_ca(&CaParams {
            cn: "Test Root CA",
            validity_days: 365,
        })
        .unwrap()
    }

    #[test]
    fn init_ca_produces_valid_pem_cert_and_key() {
        let ca = test_ca();
        assert!(ca.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn device_cert_encodes_identity_in_subject() {
        let ca = test_ca();
        let params = DeviceCertParams {
            device_id: "dev1",
            module_id: Some("mod1"),
            hub_name: Some("hub-a"),
            validity_days: 30,
        };
        let leaf = CertGenerator::issue_device(&params, &ca.cert_pem, &ca.key_pem).unwrap();

        let id = CertificateIdentity::from_der(&leaf.cert_der().unwrap());
        assert_eq!(id.device_id.as_deref(), Some("dev1"));
        assert_eq!(id.module_id.as_deref(), Some("mod1"));
        assert_eq!(id.hub_name.as_deref(), Some("hub-a"));
    }

    #[test]
    fn issue_fails_with_invalid_ca_key() {
        let ca = test_ca();
        let params = DeviceCertParams {
            device_id: "dev1",
            module_id: None,
            hub_name: None,
            validity_days: 30,
        };
        let result = CertGenerator::issue_device(&params, &ca.cert_pem, "not a pem key");
        assert!(result.is_err());
    }

    #[test]
    fn base_verifier_requires_a_ca() {
        let result = build_base_verifier(Vec::new(), Vec::new(), crypto_provider());
        assert!(result.is_err());
    }

    #[test]
    fn base_verifier_builds_from_generated_ca() {
        let ca = test_ca();
        let verifier =
            build_base_verifier(vec![ca.cert_der().unwrap()], Vec::new(), crypto_provider())
                .unwrap();
        assert!(verifier.client_auth_mandatory());
    }

    #[test]
    fn certified_key_pairs_server_cert_and_key() {
        let ca = test_ca();
        let server = CertGenerator::issue_server(
            &ServerCertParams {
                cn: "gateway",
                san_dns: vec!["localhost".to_string()],
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();

        let provider = crypto_provider();
        let key = certified_key(
            vec![server.cert_der().unwrap()],
            server.key_der().unwrap(),
            &provider,
        )
        .unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[test]
    fn server_cert_carries_dns_sans() {
        let ca = test_ca();
        let server = CertGenerator::issue_server(
            &ServerCertParams {
                cn: "gateway",
                san_dns: vec!["gw.local".to_string(), "localhost".to_string()],
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();

        let der = server.cert_der().unwrap();
        let (_, cert) = x509_parser::parse_x509_certificate(&der).unwrap();
        let san = cert.subject_alternative_name().unwrap().unwrap();
        let names: Vec<&str> = san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => Some(*dns),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["gw.local", "localhost"]);
    }

    #[test]
    fn non_ascii_dns_san_is_refused() {
        let ca = test_ca();
        let result = CertGenerator::issue_server(
            &ServerCertParams {
                cn: "gateway",
                san_dns: vec!["gäteway.local".to_string()],
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        );
        assert!(matches!(result, Err(Error::Certificate(msg)) if msg.contains("Invalid DNS SAN")));
    }

    #[test]
    fn write_then_load_round_trips_files() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_ca();
        CertGenerator::write_to_dir(&ca, dir.path(), "ca").unwrap();

        let crt = dir.path().join("ca.crt");
        let key = dir.path().join("ca.key");
        assert_eq!(load_certs(crt.to_str().unwrap()).unwrap().len(), 1);
        assert!(!load_private_key(key.to_str().unwrap()).unwrap().secret_der().is_empty());
    }

    #[test]
    fn load_certs_returns_error_for_missing_file() {
        let msg = load_certs("/nonexistent/path/ca.crt").unwrap_err().to_string();
        assert!(msg.contains("Cannot read"));
    }

    #[test]
    fn load_certs_returns_error_for_empty_pem_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        fs::write(&path, b"").unwrap();
        assert!(load_certs(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn load_private_key_returns_error_when_no_key_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert_only.pem");
        fs::write(&path, test_ca().cert_pem).unwrap();
        assert!(load_private_key(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_crl_file_is_an_error() {
        assert!(load_crls("/nonexistent/crl.pem").is_err());
    }
}
