//! Client identity: what a certificate claims and who vouches for it.
//!
//! # Modules
//!
//! - [`parser`]: Subject DN → [`CertificateIdentity`]
//! - [`credential`]: [`Credential`] model and [`CredentialFactory`]
//! - [`authenticator`]: [`Authenticator`] seam and the static registry
//! - [`remote`]: HTTP identity authority client

pub mod authenticator;
pub mod credential;
pub mod parser;
pub mod remote;

pub use authenticator::{Authenticator, RegisteredIdentity, RegistryAuthenticator};
pub use credential::{
    AuthenticationType, ClientIdentity, Credential, CredentialFactory, X509CredentialFactory,
    thumbprint,
};
pub use parser::CertificateIdentity;
pub use remote::RemoteAuthenticator;
