//! Proxy process errors.

use std::path::PathBuf;

use meridian_config::ConfigError;
use thiserror::Error;

/// Failures starting or running the redirect server.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket or file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The process configuration file could not be read.
    #[error("failed to read config `{path}`: {source}")]
    ReadConfig {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The process configuration file is not valid TOML for [`crate::config::ProxyConfig`].
    #[error("invalid config `{path}`: {source}")]
    ParseConfig {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// The distribution/CDN seed could not be loaded.
    #[error(transparent)]
    Catalog(#[from] ConfigError),
    /// TLS material was rejected.
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    /// No private key found in the key file.
    #[error("no private key in `{0}`")]
    MissingPrivateKey(PathBuf),
    /// The outbound HTTP client could not be built.
    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
