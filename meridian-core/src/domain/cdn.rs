//! CDN instance documents.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::default_true;
use crate::token::TokenScheme;

/// Default ALTO refresh interval in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Which driver variant handles a CDN instance.
///
/// Unknown driver names fall back to [`DriverKind::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DriverKind {
    /// Static host substitution, no token handling.
    #[default]
    Generic,
    /// Velocix: routing service lookup and Velocix HMAC tokens.
    Velocix,
    /// Akamai: static substitution and Akamai edge tokens.
    Akamai,
    /// Amazon CloudFront: static substitution and RSA signed URLs.
    CloudFront,
}

impl DriverKind {
    /// Resolve a driver name as found in configuration documents.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "velocix" => DriverKind::Velocix,
            "akamai" => DriverKind::Akamai,
            "amazon" | "cloudfront" => DriverKind::CloudFront,
            _ => DriverKind::Generic,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Generic => "generic",
            DriverKind::Velocix => "velocix",
            DriverKind::Akamai => "akamai",
            DriverKind::CloudFront => "amazon",
        }
    }

    /// Token codec this driver mints with, if any.
    pub fn token_scheme(&self) -> Option<TokenScheme> {
        match self {
            DriverKind::Generic => None,
            DriverKind::Velocix => Some(TokenScheme::Velocix),
            DriverKind::Akamai => Some(TokenScheme::Akamai),
            DriverKind::CloudFront => Some(TokenScheme::CloudFront),
        }
    }
}

impl From<String> for DriverKind {
    fn from(name: String) -> Self {
        DriverKind::from_name(&name)
    }
}

impl From<DriverKind> for String {
    fn from(kind: DriverKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw configuration of one CDN instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnInstanceConfig {
    /// Unique id, referenced by distribution provider entries.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Driver variant.
    #[serde(default)]
    pub driver: DriverKind,
    /// Inactive instances are never selected.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Client ranges this instance is restricted to.
    #[serde(default)]
    pub whitelist: Option<WhitelistConfig>,
    /// External routing service, used by the Velocix driver.
    #[serde(default)]
    pub routing_service: Option<RoutingServiceConfig>,
}

/// Client address restrictions of a CDN instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistConfig {
    /// Manually configured CIDR ranges.
    #[serde(default)]
    pub ranges: Vec<String>,
    /// Topology derived ranges.
    #[serde(default)]
    pub alto: Option<AltoConfig>,
}

/// Where and how to fetch an ALTO network map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AltoConfig {
    /// Directory or network map URL.
    pub url: String,
    /// Network map resource id to pick from a directory; first found when absent.
    #[serde(default)]
    pub network_map_id: Option<String>,
    /// PIDs whose ranges are ignored.
    #[serde(default)]
    pub ignore_pids: Vec<String>,
    /// Seconds between successful refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

/// Velocix routing service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingServiceConfig {
    /// Absolute URL the routing query is appended to.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_names_are_generic() {
        assert_eq!(DriverKind::from_name("Velocix"), DriverKind::Velocix);
        assert_eq!(DriverKind::from_name("cloudfront"), DriverKind::CloudFront);
        assert_eq!(DriverKind::from_name("amazon"), DriverKind::CloudFront);
        assert_eq!(DriverKind::from_name("limelight"), DriverKind::Generic);
    }

    #[test]
    fn instance_defaults() {
        let cdn: CdnInstanceConfig = serde_json::from_str(
            r#"{"id":"v1","driver":"velocix","whitelist":{"alto":{"url":"http://alto/"}}}"#,
        )
        .unwrap();
        assert!(cdn.active);
        assert_eq!(cdn.driver, DriverKind::Velocix);
        let alto = cdn.whitelist.unwrap().alto.unwrap();
        assert_eq!(alto.refresh_interval, DEFAULT_REFRESH_INTERVAL_SECS);
        assert!(alto.ignore_pids.is_empty());
    }
}
