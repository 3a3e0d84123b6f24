#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Token credentials and bearer authentication for the Nimbus pipeline.
//!
//! A [`TokenCredential`] performs the exchange with an identity provider.
//! [`CredentialResolver`] caches its tokens per scope set and coalesces
//! concurrent refreshes, and [`BearerTokenPolicy`] plugs the resolver into a
//! [`nimbus_http::Pipeline`]:
//!
//! ```ignore
//! use nimbus_auth::{BearerTokenPolicy, DefaultCredential};
//! use nimbus_http::{ClientOptions, Pipeline};
//! use std::sync::Arc;
//!
//! let credential = Arc::new(DefaultCredential::new()?);
//! let pipeline = Pipeline::builder(ClientOptions::default())
//!     .authentication(Arc::new(BearerTokenPolicy::from_credential(
//!         credential,
//!         ["https://management.example.com/.default"],
//!     )))
//!     .build()?;
//! ```

mod credential;
mod error;
mod policy;
mod resolver;
mod secret;
mod token;

pub mod credentials;

pub use credential::TokenCredential;
pub use credentials::{
    ChainedTokenCredential, ClientSecretCredential, CredentialOptions, DefaultCredential,
    EnvironmentCredential, ManagedIdentityCredential, StaticTokenCredential,
};
pub use error::{CredentialError, format_http_error};
pub use policy::BearerTokenPolicy;
pub use resolver::{CredentialResolver, DEFAULT_REFRESH_MARGIN};
pub use secret::SecretString;
pub use token::AccessToken;
