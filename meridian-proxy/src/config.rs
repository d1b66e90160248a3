//! Process configuration, read from a TOML file.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! catalog = "/etc/meridian/catalog.json"
//! trust_forwarded_for = false
//! log_filter = "info"
//!
//! [tls]
//! cert = "/etc/meridian/cert.pem"
//! key = "/etc/meridian/key.pem"
//!
//! [load_balancer]
//! window_ms = 60000
//!
//! [outbound]
//! timeout_ms = 5000
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ProxyError;

/// Top-level process configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address the redirect server binds to.
    pub listen: SocketAddr,
    /// JSON seed with distributions and CDN instances.
    pub catalog: Option<PathBuf>,
    /// TLS termination; plain HTTP when absent.
    pub tls: Option<TlsSettings>,
    /// Load balancer settings.
    pub load_balancer: LoadBalancerSettings,
    /// Outbound HTTP settings (routing service, ALTO).
    pub outbound: OutboundSettings,
    /// Take the client address from the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            catalog: None,
            tls: None,
            load_balancer: LoadBalancerSettings::default(),
            outbound: OutboundSettings::default(),
            trust_forwarded_for: false,
            log_filter: "info".to_string(),
        }
    }
}

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    /// Certificate chain path.
    pub cert: PathBuf,
    /// Private key path.
    pub key: PathBuf,
}

/// Load balancer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerSettings {
    /// Length of the usage window in milliseconds.
    pub window_ms: u64,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self { window_ms: 60_000 }
    }
}

impl LoadBalancerSettings {
    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.max(1))
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutboundSettings {
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl OutboundSettings {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ProxyConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ProxyError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source).map_err(|source| ProxyError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}
