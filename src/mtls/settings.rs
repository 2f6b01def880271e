//! Transport settings shared by every connection of a listener.
//!
//! Built once at startup from [`Config`](crate::config::Config). Everything
//! here is validated eagerly; accepting a connection never re-checks it.

use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::info;
use uuid::Uuid;

use super::bridge::AuthBridge;
use super::cert_manager::{
    build_base_verifier, certified_key, crypto_provider, load_certs, load_crls, load_private_key,
};
use super::handshake::AuthContext;
use super::verifier::CertAuthVerifier;
use crate::config::Config;
use crate::identity::{Authenticator, X509CredentialFactory};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Client certificate authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Client certificate authentication: the identity dependencies plus the
/// chain validation rustls runs after them.
#[derive(Debug, Clone)]
pub struct ClientCertAuth {
    context: Arc<AuthContext>,
    base_verifier: Arc<dyn ClientCertVerifier>,
}

impl ClientCertAuth {
    /// Combine identity authentication with chain validation.
    #[must_use]
    pub fn new(context: Arc<AuthContext>, base_verifier: Arc<dyn ClientCertVerifier>) -> Self {
        Self {
            context,
            base_verifier,
        }
    }

    /// Shared authentication dependencies.
    #[must_use]
    pub fn context(&self) -> &Arc<AuthContext> {
        &self.context
    }

    /// Fresh verifier for one connection.
    #[must_use]
    pub fn verifier_for(&self, connection_id: Uuid) -> Arc<CertAuthVerifier> {
        Arc::new(CertAuthVerifier::new(
            Arc::clone(&self.context),
            Arc::clone(&self.base_verifier),
            connection_id,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server certificate
// ─────────────────────────────────────────────────────────────────────────────

/// Always presents the configured server certificate.
#[derive(Debug)]
struct ServerCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for ServerCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable settings every [`TlsTransport`](super::TlsTransport) of a
/// listener is built from.
#[derive(Debug)]
pub struct TransportSettings {
    scheme: String,
    host: String,
    port: u16,
    handshake_timeout: Duration,
    provider: Arc<CryptoProvider>,
    resolver: Arc<ServerCertResolver>,
    client_auth: Option<ClientCertAuth>,
}

impl TransportSettings {
    /// Start building settings for `scheme://host:port`.
    #[must_use]
    pub fn builder(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> TransportSettingsBuilder {
        TransportSettingsBuilder {
            scheme: scheme.into(),
            host: host.into(),
            port,
            handshake_timeout: Duration::from_secs(30),
            provider: None,
            server_key: None,
            client_auth: None,
        }
    }

    /// Build settings from validated configuration.
    ///
    /// Loads the server certificate and key, and, when client certificate
    /// authentication is on, the CA, optional CRL, the credential factory
    /// and the authentication bridge. `authenticator` decides on credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any TLS material
    /// cannot be loaded.
    pub fn from_config(config: &Config, authenticator: Arc<dyn Authenticator>) -> Result<Self> {
        config.validate()?;
        let provider = crypto_provider();

        let chain = load_certs(&config.tls.server_cert)?;
        let key = load_private_key(&config.tls.server_key)?;
        let server_key = certified_key(chain, key, &provider)?;

        let mut builder = Self::builder(
            &config.listener.scheme,
            &config.listener.host,
            config.listener.port,
        )
        .handshake_timeout(config.listener.handshake_timeout)
        .provider(Arc::clone(&provider))
        .server_key(server_key);

        if config.tls.client_cert_auth {
            let ca_path = config.tls.ca_cert.as_deref().ok_or_else(|| {
                Error::Config("tls.ca_cert is required for client certificate auth".to_string())
            })?;
            let crls = match &config.tls.crl_path {
                Some(path) => load_crls(path)?,
                None => Vec::new(),
            };
            let base = build_base_verifier(load_certs(ca_path)?, crls, Arc::clone(&provider))?;

            let bridge = AuthBridge::new(
                config.auth.worker_threads,
                config.auth.max_inflight,
                config.auth.timeout,
            )?;
            let context = AuthContext::new(
                &config.auth.hub_name,
                Arc::new(X509CredentialFactory::new(&config.auth.hub_name)),
                authenticator,
                Arc::new(bridge),
            );
            builder = builder.client_auth(ClientCertAuth::new(Arc::new(context), base));
        }

        builder.build()
    }

    /// Protocol scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Bind host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Bind port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Handshake deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Client certificate authentication, when enabled.
    #[must_use]
    pub fn client_auth(&self) -> Option<&ClientCertAuth> {
        self.client_auth.as_ref()
    }

    /// Hub name, when client certificate authentication is enabled.
    #[must_use]
    pub fn hub_name(&self) -> Option<&str> {
        self.client_auth.as_ref().map(|auth| auth.context().hub_name())
    }

    /// rustls server config for one connection.
    ///
    /// `verifier` is that connection's own verifier; `None` serves
    /// server-authenticated TLS only.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the crypto provider does not support TLS 1.3.
    pub fn server_config(
        &self,
        verifier: Option<Arc<dyn ClientCertVerifier>>,
    ) -> Result<Arc<ServerConfig>> {
        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let builder = match verifier {
            Some(verifier) => builder.with_client_cert_verifier(verifier),
            None => builder.with_no_client_auth(),
        };

        let resolver: Arc<dyn ResolvesServerCert> = Arc::clone(&self.resolver) as _;
        Ok(Arc::new(builder.with_cert_resolver(resolver)))
    }
}

/// Builder for [`TransportSettings`].
#[derive(Debug)]
pub struct TransportSettingsBuilder {
    scheme: String,
    host: String,
    port: u16,
    handshake_timeout: Duration,
    provider: Option<Arc<CryptoProvider>>,
    server_key: Option<Arc<CertifiedKey>>,
    client_auth: Option<ClientCertAuth>,
}

impl TransportSettingsBuilder {
    /// Handshake deadline (default 30s).
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Crypto provider (default aws-lc-rs).
    #[must_use]
    pub fn provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Server certificate and key. Required.
    #[must_use]
    pub fn server_key(mut self, key: Arc<CertifiedKey>) -> Self {
        self.server_key = Some(key);
        self
    }

    /// Enable client certificate authentication.
    #[must_use]
    pub fn client_auth(mut self, client_auth: ClientCertAuth) -> Self {
        self.client_auth = Some(client_auth);
        self
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the server certificate is absent, the
    /// scheme or host is blank, or the handshake timeout is zero.
    pub fn build(self) -> Result<TransportSettings> {
        let server_key = self
            .server_key
            .ok_or_else(|| Error::Config("server certificate is required".to_string()))?;
        if self.scheme.trim().is_empty() || self.host.trim().is_empty() {
            return Err(Error::Config("scheme and host must not be empty".to_string()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake timeout must be > 0".to_string()));
        }

        info!(
            scheme = %self.scheme,
            host = %self.host,
            port = self.port,
            client_cert_auth = self.client_auth.is_some(),
            "Transport settings ready"
        );

        Ok(TransportSettings {
            scheme: self.scheme,
            host: self.host,
            port: self.port,
            handshake_timeout: self.handshake_timeout,
            provider: self.provider.unwrap_or_else(crypto_provider),
            resolver: Arc::new(ServerCertResolver(server_key)),
            client_auth: self.client_auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, TlsConfig};
    use crate::identity::RegistryAuthenticator;
    use crate::mtls::cert_manager::{CaParams, CertGenerator, ServerCertParams};

    fn server_key() -> Arc<CertifiedKey> {
        let ca = CertGenerator::init_ca(&CaParams {
            cn: "Settings CA",
            validity_days: 30,
        })
        .unwrap();
        let server = CertGenerator::issue_server(
            &ServerCertParams {
                cn: "localhost",
                san_dns: vec!["localhost".into()],
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        certified_key(
            vec![server.cert_der().unwrap()],
            server.key_der().unwrap(),
            &crypto_provider(),
        )
        .unwrap()
    }

    #[test]
    fn build_fails_without_server_certificate() {
        let err = TransportSettings::builder("amqps", "127.0.0.1", 5671)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("server certificate is required"));
    }

    #[test]
    fn build_rejects_blank_host() {
        let result = TransportSettings::builder("amqps", " ", 5671)
            .server_key(server_key())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn settings_without_client_auth_build_plain_tls() {
        let settings = TransportSettings::builder("mqtts", "127.0.0.1", 8883)
            .server_key(server_key())
            .build()
            .unwrap();

        assert!(settings.client_auth().is_none());
        assert!(settings.hub_name().is_none());
        assert_eq!(settings.scheme(), "mqtts");
        assert!(settings.server_config(None).is_ok());
    }

    #[test]
    fn from_config_loads_tls_material() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertGenerator::init_ca(&CaParams {
            cn: "Config CA",
            validity_days: 30,
        })
        .unwrap();
        let server = CertGenerator::issue_server(
            &ServerCertParams {
                cn: "localhost",
                san_dns: vec!["localhost".into()],
                validity_days: 30,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        CertGenerator::write_to_dir(&ca, dir.path(), "ca").unwrap();
        CertGenerator::write_to_dir(&server, dir.path(), "server").unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().to_string();

        let config = Config {
            tls: TlsConfig {
                server_cert: path("server.crt"),
                server_key: path("server.key"),
                ca_cert: Some(path("ca.crt")),
                ..TlsConfig::default()
            },
            auth: AuthConfig {
                hub_name: "hub-a".into(),
                worker_threads: 1,
                ..AuthConfig::default()
            },
            ..Config::default()
        };

        let settings =
            TransportSettings::from_config(&config, Arc::new(RegistryAuthenticator::default()))
                .unwrap();
        assert_eq!(settings.hub_name(), Some("hub-a"));
        assert_eq!(settings.port(), 5671);
    }

    #[test]
    fn from_config_fails_for_missing_files() {
        let config = Config {
            tls: TlsConfig {
                server_cert: "/nonexistent/server.crt".into(),
                server_key: "/nonexistent/server.key".into(),
                ca_cert: Some("/nonexistent/ca.crt".into()),
                ..TlsConfig::default()
            },
            auth: AuthConfig {
                hub_name: "hub-a".into(),
                ..AuthConfig::default()
            },
            ..Config::default()
        };
        let result =
            TransportSettings::from_config(&config, Arc::new(RegistryAuthenticator::default()));
        assert!(result.is_err());
    }
}
