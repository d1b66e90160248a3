//! CDN candidate selection.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::domain::catalog::DistributionCatalog;
use crate::domain::distribution::{Distribution, Provider};
use crate::driver::registry::DriverRegistry;
use crate::driver::CdnDriver;

/// A provider eligible to serve a request.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The distribution's entry for this provider.
    pub provider: Provider,
    /// Live driver of the CDN instance.
    pub driver: Arc<CdnDriver>,
    /// The client is inside the CDN's configured whitelist.
    pub whitelisted: bool,
}

impl Candidate {
    /// Provider / CDN instance id.
    pub fn id(&self) -> &str {
        &self.provider.id
    }
}

/// Result of [`CdnSelector::select`].
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Distribution matched by hostname.
    pub distribution: Option<Arc<Distribution>>,
    /// Eligible providers in distribution order.
    pub candidates: Vec<Candidate>,
}

impl Selection {
    /// Whether no provider can serve the request.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Picks the providers that may serve a client, reading the current catalog and
/// driver registry on every call.
#[derive(Debug, Clone)]
pub struct CdnSelector {
    catalog: Arc<DistributionCatalog>,
    registry: Arc<DriverRegistry>,
}

impl CdnSelector {
    /// Create a selector over shared catalog and registry.
    pub fn new(catalog: Arc<DistributionCatalog>, registry: Arc<DriverRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Candidates for `client_ip` requesting from `host`, in distribution order.
    pub fn select(&self, client_ip: IpAddr, host: &str) -> Selection {
        let Some(distribution) = self.catalog.by_hostname(host) else {
            debug!(%host, "no distribution for host");
            return Selection::default();
        };

        let candidates = distribution
            .providers
            .iter()
            .filter(|provider| provider.active)
            .filter_map(|provider| {
                let Some(driver) = self.registry.get(&provider.id) else {
                    debug!(cdn = %provider.id, "provider has no loaded cdn instance");
                    return None;
                };
                if !driver.is_active() || !driver.is_client_ip_allowed(client_ip) {
                    return None;
                }
                Some(Candidate {
                    provider: provider.clone(),
                    whitelisted: driver.is_client_ip_whitelisted(client_ip),
                    driver,
                })
            })
            .collect();

        Selection {
            distribution: Some(distribution),
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cdn::{CdnInstanceConfig, DriverKind, WhitelistConfig};
    use crate::domain::distribution::SelectionMode;

    fn provider(id: &str, active: bool) -> Provider {
        Provider {
            id: id.into(),
            driver: None,
            active,
            hostname: None,
            load_balancer: None,
            token_config: None,
            signed_url_config: None,
        }
    }

    fn cdn(id: &str, active: bool, ranges: &[&str]) -> CdnInstanceConfig {
        CdnInstanceConfig {
            id: id.into(),
            name: None,
            driver: DriverKind::Generic,
            active,
            whitelist: (!ranges.is_empty()).then(|| WhitelistConfig {
                ranges: ranges.iter().map(|r| r.to_string()).collect(),
                alto: None,
            }),
            routing_service: None,
        }
    }

    fn selector() -> CdnSelector {
        let catalog = Arc::new(DistributionCatalog::new(vec![Distribution {
            id: "dist".into(),
            hostnames: vec!["video.example.com".into()],
            selection_mode: SelectionMode::Failover,
            auth: None,
            providers: vec![
                provider("edge", true),
                provider("disabled-entry", false),
                provider("switched-off", true),
                provider("unloaded", true),
                provider("fallback", true),
            ],
        }]));
        let registry = Arc::new(DriverRegistry::new(reqwest::Client::new()));
        registry.upsert(cdn("edge", true, &["10.0.0.0/8"]));
        registry.upsert(cdn("disabled-entry", true, &[]));
        registry.upsert(cdn("switched-off", false, &[]));
        registry.upsert(cdn("fallback", true, &[]));
        CdnSelector::new(catalog, registry)
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection.candidates.iter().map(Candidate::id).collect()
    }

    #[test]
    fn filters_inactive_unloaded_and_foreign_clients() {
        let selector = selector();

        let inside = selector.select("10.1.1.1".parse().unwrap(), "VIDEO.example.com:443");
        assert_eq!(ids(&inside), ["edge", "fallback"]);
        assert!(inside.candidates[0].whitelisted);
        assert!(!inside.candidates[1].whitelisted);

        let outside = selector.select("192.0.2.1".parse().unwrap(), "video.example.com");
        assert_eq!(ids(&outside), ["fallback"]);
    }

    #[test]
    fn unknown_host_has_no_candidates() {
        let selection = selector().select("10.1.1.1".parse().unwrap(), "other.example.com");
        assert!(selection.distribution.is_none());
        assert!(selection.is_empty());
    }
}
