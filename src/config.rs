//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::identity::RegisteredIdentity;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub listener: ListenerConfig,
    /// TLS material
    pub tls: TlsConfig,
    /// Client authentication
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `EDGE_GATEWAY_` prefix with `__` as the
    /// nesting separator, e.g. `EDGE_GATEWAY_AUTH__HUB_NAME`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("EDGE_GATEWAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration before any listener is built.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.listener.validate()?;
        self.tls.validate()?;
        self.auth.validate()
    }
}

fn require(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} must not be empty")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Protocol scheme served over TLS (e.g. `amqps`, `mqtts`)
    pub scheme: String,
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upper bound on the TLS handshake I/O. Authentication runs inside the
    /// certificate hook and is bounded by `auth.timeout` instead.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            scheme: "amqps".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5671,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl ListenerConfig {
    fn validate(&self) -> Result<()> {
        require(&self.scheme, "listener.scheme")?;
        require(&self.host, "listener.host")?;
        if self.port == 0 {
            return Err(Error::Config("listener.port must be > 0".to_string()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "listener.handshake_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TLS
// ─────────────────────────────────────────────────────────────────────────────

/// TLS material, all paths to PEM files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Server certificate chain
    pub server_cert: String,
    /// Server private key
    pub server_key: String,
    /// CA bundle client certificates must chain to
    pub ca_cert: Option<String>,
    /// Certificate revocation list
    pub crl_path: Option<String>,
    /// Require and authenticate client certificates
    pub client_cert_auth: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_cert: String::new(),
            server_key: String::new(),
            ca_cert: None,
            crl_path: None,
            client_cert_auth: true,
        }
    }
}

impl TlsConfig {
    fn validate(&self) -> Result<()> {
        require(&self.server_cert, "tls.server_cert")?;
        require(&self.server_key, "tls.server_key")?;
        if self.client_cert_auth && self.ca_cert.as_deref().is_none_or(|p| p.trim().is_empty()) {
            return Err(Error::Config(
                "tls.ca_cert is required when tls.client_cert_auth is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Client authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Hub this gateway serves
    pub hub_name: String,
    /// Deadline for one authenticator call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum concurrent authenticator calls
    pub max_inflight: usize,
    /// Threads of the authentication runtime
    pub worker_threads: usize,
    /// Identity authority
    pub authenticator: AuthenticatorConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hub_name: String::new(),
            timeout: Duration::from_secs(10),
            max_inflight: 64,
            worker_threads: 2,
            authenticator: AuthenticatorConfig::default(),
        }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<()> {
        require(&self.hub_name, "auth.hub_name")?;
        if self.timeout.is_zero() {
            return Err(Error::Config("auth.timeout must be > 0".to_string()));
        }
        if self.max_inflight == 0 {
            return Err(Error::Config("auth.max_inflight must be > 0".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("auth.worker_threads must be > 0".to_string()));
        }
        self.authenticator.validate()
    }
}

/// Which identity authority decides on credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthenticatorConfig {
    /// Static identity registry
    Registry {
        /// Registered identities
        #[serde(default)]
        identities: Vec<RegisteredIdentity>,
    },
    /// HTTP identity authority
    Remote {
        /// Endpoint the credential is posted to
        url: String,
    },
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self::Registry {
            identities: Vec::new(),
        }
    }
}

impl AuthenticatorConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Registry { identities } => {
                for identity in identities {
                    require(&identity.device_id, "auth.authenticator.identities[].device_id")?;
                }
                Ok(())
            }
            Self::Remote { url } => {
                let parsed = Url::parse(url).map_err(|e| {
                    Error::Config(format!("auth.authenticator.url '{url}' is invalid: {e}"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(Error::Config(format!(
                        "auth.authenticator.url must be http or https, got '{}'",
                        parsed.scheme()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Human-readable duration serialization
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" must be tried before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration too large: {s}")))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
