//! Error types for the edge gateway

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the edge gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Edge gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate loading, parsing or generation error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Credential could not be built from the presented identity
    #[error("Credential error: {0}")]
    Credential(String),

    /// Identity authority fault (not a denial)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Authentication did not finish in time
    #[error("Authentication timed out after {0:?}")]
    AuthenticationTimeout(Duration),

    /// TLS handshake failed or was rejected
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// rustls error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server shutdown
    #[error("Server shutdown")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was produced while talking to the identity authority.
    ///
    /// Such errors are always converted into a handshake rejection.
    #[must_use]
    pub fn is_authentication_fault(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::AuthenticationTimeout(_)
                | Self::Http(_)
                | Self::Json(_)
        )
    }
}
