//! TLS termination.
//!
//! Loads a certificate chain and private key into a `rustls::ServerConfig` and
//! wraps it in an acceptor for incoming connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use pki_types::CertificateDer;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsSettings;
use crate::error::ProxyError;

/// Load a TLS `ServerConfig` from PEM certificate and key files. The key may be
/// PKCS#1, PKCS#8 or SEC1.
pub fn load_tls_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<ServerConfig>, ProxyError> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let key_path = key_path.as_ref();
    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ProxyError::MissingPrivateKey(key_path.to_path_buf()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // Redirects are served over HTTP/1.1 only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Build an acceptor from configured settings.
pub fn acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, ProxyError> {
    load_tls_config(&settings.cert, &settings.key).map(TlsAcceptor::from)
}
