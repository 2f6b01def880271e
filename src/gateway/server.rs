//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{AuthConfig, AuthenticatorConfig, Config};
use crate::identity::{Authenticator, RegistryAuthenticator, RemoteAuthenticator};
use crate::mtls::{ConnectionHandler, TlsConnection, TlsListener, TransportSettings};
use crate::Result;

/// Edge gateway server
pub struct Gateway {
    /// Transport settings shared by every connection
    settings: Arc<TransportSettings>,
    /// Receives authenticated connections
    handler: Arc<dyn ConnectionHandler>,
}

impl Gateway {
    /// Create a gateway that drains every accepted connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or TLS material
    /// cannot be loaded.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_handler(config, Arc::new(DrainHandler))
    }

    /// Create a gateway that hands connections to `handler`.
    ///
    /// All dependency wiring happens here, once.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or TLS material
    /// cannot be loaded.
    pub fn with_handler(config: &Config, handler: Arc<dyn ConnectionHandler>) -> Result<Self> {
        config.validate()?;
        let authenticator = authenticator_from_config(&config.auth)?;
        let settings = TransportSettings::from_config(config, authenticator)?;

        Ok(Self {
            settings: Arc::new(settings),
            handler,
        })
    }

    /// Shared transport settings.
    #[must_use]
    pub fn settings(&self) -> &Arc<TransportSettings> {
        &self.settings
    }

    /// Run until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener = TlsListener::bind(Arc::clone(&self.settings)).await?;

        tokio::spawn(shutdown_signal(shutdown_tx));

        listener.serve(self.handler, shutdown_rx).await
    }
}

/// Build the configured identity authority.
///
/// # Errors
///
/// Returns `Error::Config` if the remote authority URL is invalid.
pub fn authenticator_from_config(auth: &AuthConfig) -> Result<Arc<dyn Authenticator>> {
    match &auth.authenticator {
        AuthenticatorConfig::Registry { identities } => {
            let registry = RegistryAuthenticator::new(identities);
            info!(identities = registry.len(), "Using identity registry");
            if registry.is_empty() {
                warn!("Identity registry is empty, every client will be denied");
            }
            Ok(Arc::new(registry))
        }
        AuthenticatorConfig::Remote { url } => {
            let remote = RemoteAuthenticator::new(url, auth.timeout)?;
            info!(endpoint = %remote.endpoint(), "Using remote identity authority");
            Ok(Arc::new(remote))
        }
    }
}

/// Default handler: logs the principal and reads the stream until EOF.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainHandler;

#[async_trait]
impl ConnectionHandler for DrainHandler {
    async fn handle(&self, connection: TlsConnection<TcpStream>, peer: SocketAddr) -> Result<()> {
        let connection_id = connection.connection_id();
        let identity = connection
            .principal()
            .and_then(|p| p.credential())
            .map(|c| c.identity().to_string());
        info!(%connection_id, %peer, identity = ?identity, "Connection ready");

        let (mut stream, _principal) = connection.into_parts();
        let bytes = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
        info!(%connection_id, %peer, bytes, "Connection finished");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RegisteredIdentity;

    #[test]
    fn registry_authenticator_from_config() {
        let auth = AuthConfig {
            authenticator: AuthenticatorConfig::Registry {
                identities: vec![RegisteredIdentity {
                    device_id: "dev1".into(),
                    ..RegisteredIdentity::default()
                }],
            },
            ..AuthConfig::default()
        };
        assert!(authenticator_from_config(&auth).is_ok());
    }

    #[test]
    fn remote_authenticator_requires_valid_url() {
        let auth = AuthConfig {
            authenticator: AuthenticatorConfig::Remote {
                url: "ftp://nowhere".into(),
            },
            ..AuthConfig::default()
        };
        assert!(authenticator_from_config(&auth).is_err());
    }

    #[test]
    fn gateway_rejects_invalid_config() {
        assert!(Gateway::new(&Config::default()).is_err());
    }
}
