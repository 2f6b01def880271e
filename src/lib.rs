//! Edge Gateway Library
//!
//! Mutual-TLS client identity authentication for an IoT edge gateway.
//!
//! # Features
//!
//! - **Certificate identities**: device id, module id and hub name read from the client certificate subject
//! - **Identity policy**: device id required, module certificates bound to the hub
//! - **Pluggable authorities**: static thumbprint registry or a remote HTTP identity authority
//! - **Bounded bridge**: async authenticators called from the synchronous rustls hook with a timeout and concurrency ceiling
//! - **Per-connection principals**: every accepted connection carries its own `AuthenticatedPrincipal`
//! - **Certificate tooling**: CA, server and device certificate generation without `openssl`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod mtls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`. `format` of `Some("json")` selects JSON
/// output; anything else selects human-readable text.
///
/// # Errors
///
/// Returns `Error::Internal` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
