//! TLS setup for [`HttpTransport`](crate::HttpTransport).
//!
//! Native root certificates are loaded from the OS store once per process.

use crate::error::HttpError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Root certificate source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRoots {
    /// Mozilla roots compiled into the binary
    #[default]
    WebPki,
    /// OS native certificate store
    Native,
}

/// Empty vec means no certs were found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Cached native root certificates (possibly empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// The globally installed crypto provider, else a fresh aws-lc-rs provider.
///
/// Never installs a provider globally.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!(
                "no valid native root CA certificates parsed (found {}, all failed)",
                certs.len()
            )
            .into(),
        ));
    }

    Ok(
        rustls::ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| HttpError::Tls(Box::new(e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Build an HTTPS connector advertising h2 and http/1.1 via ALPN.
///
/// # Errors
/// Returns `HttpError::Tls` if the chosen roots cannot be loaded.
pub(crate) fn https_connector(
    roots: TlsRoots,
    allow_http: bool,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match roots {
        TlsRoots::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRoots::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
    };
    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
