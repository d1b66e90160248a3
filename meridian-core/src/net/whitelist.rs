//! Per-CDN client whitelist.

use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use tracing::warn;

use super::alto::NetworkClassifier;
use super::trie::IpTrie;
use crate::domain::cdn::WhitelistConfig;

/// Client ranges a CDN instance is restricted to: manual ranges plus, optionally,
/// the on-net ranges of an ALTO topology.
///
/// A whitelist with neither source configured lets every client through.
#[derive(Debug, Default)]
pub struct ProviderWhitelist {
    manual: IpTrie<()>,
    topology: Option<Arc<NetworkClassifier>>,
    configured: bool,
}

impl ProviderWhitelist {
    /// A whitelist that allows everyone.
    pub fn open() -> Self {
        Self::default()
    }

    /// Build from configuration. Malformed ranges are logged and skipped.
    pub fn build(config: Option<&WhitelistConfig>, topology: Option<Arc<NetworkClassifier>>) -> Self {
        let mut manual = IpTrie::new();
        if let Some(config) = config {
            for range in &config.ranges {
                match range.parse::<IpNetwork>() {
                    Ok(network) => {
                        manual.insert(network, ());
                    }
                    Err(error) => warn!(range = %range, %error, "skipping malformed whitelist range"),
                }
            }
        }
        let configured = config.is_some_and(|c| !c.ranges.is_empty()) || topology.is_some();
        Self {
            manual,
            topology,
            configured,
        }
    }

    /// Whether any restriction is configured.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether `ip` is inside a manual range or the on-net topology.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.manual.contains(ip) || self.topology.as_ref().is_some_and(|t| t.is_on_net(ip))
    }

    /// Whether a client at `ip` may use this CDN.
    pub fn allows(&self, ip: IpAddr) -> bool {
        !self.configured || self.contains(ip)
    }

    /// The topology classifier feeding this whitelist.
    pub fn topology(&self) -> Option<&Arc<NetworkClassifier>> {
        self.topology.as_ref()
    }
}
