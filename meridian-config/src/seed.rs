//! JSON seed documents: `{"distributions": [...], "cdns": [...]}`.

use std::path::Path;

use meridian_core::{CdnInstanceConfig, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A full set of configuration documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSeed {
    /// Distribution documents.
    pub distributions: Vec<Distribution>,
    /// CDN instance documents.
    pub cdns: Vec<CdnInstanceConfig>,
}

impl ConfigSeed {
    /// Parse a seed document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a seed file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{DriverKind, SelectionMode};

    #[test]
    fn parses_documents() {
        let seed = ConfigSeed::from_json(
            r#"{
                "distributions": [{
                    "id": "news",
                    "hostnames": ["news.example.com"],
                    "selectionMode": "loadbalance",
                    "providers": [
                        { "id": "edge", "loadBalancer": { "targetLoadPercent": 70 } },
                        { "id": "cloud", "hostname": "d1.cloudfront.net" }
                    ]
                }],
                "cdns": [
                    { "id": "edge", "driver": "velocix", "routingService": { "url": "http://rs.example/route" } },
                    { "id": "cloud", "driver": "amazon" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(seed.distributions[0].selection_mode, SelectionMode::LoadBalance);
        assert_eq!(seed.distributions[0].providers.len(), 2);
        assert_eq!(seed.cdns[1].driver, DriverKind::CloudFront);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        assert_eq!(ConfigSeed::from_json("{}").unwrap(), ConfigSeed::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ConfigSeed::from_path("/nonexistent/meridian-seed.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
