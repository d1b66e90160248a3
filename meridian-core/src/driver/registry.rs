//! Live set of CDN drivers keyed by instance id.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use super::CdnDriver;
use crate::domain::cdn::CdnInstanceConfig;
use crate::domain::ChangeEvent;
use crate::net::alto::NetworkClassifier;
use crate::net::whitelist::ProviderWhitelist;

type DriverMap = HashMap<String, Arc<CdnDriver>>;

/// Registry of [`CdnDriver`]s built from CDN instance configuration.
///
/// Readers take a lock-free snapshot; updates replace the whole map. A driver whose
/// topology configuration is unchanged (or merely edited) keeps its running
/// [`NetworkClassifier`] so the on-net ranges do not have to be fetched again.
#[derive(Debug)]
pub struct DriverRegistry {
    drivers: ArcSwap<DriverMap>,
    client: reqwest::Client,
}

impl DriverRegistry {
    /// Create an empty registry. `client` is shared by routing service and topology
    /// requests.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            drivers: ArcSwap::from_pointee(HashMap::new()),
            client,
        }
    }

    /// Apply one change from the configuration feed.
    pub fn apply(&self, event: ChangeEvent<CdnInstanceConfig>) {
        match event {
            ChangeEvent::Updated { doc, .. } => self.upsert(doc),
            ChangeEvent::Deleted { id } => self.remove(&id),
        }
    }

    /// Build (or rebuild) the driver for `config`.
    pub fn upsert(&self, config: CdnInstanceConfig) {
        let id = config.id.clone();
        let previous = self.get(&id);
        let topology = self.topology_for(&config, previous.as_deref());
        let whitelist = ProviderWhitelist::build(config.whitelist.as_ref(), topology);
        let driver = Arc::new(CdnDriver::new(config, whitelist, self.client.clone()));

        self.drivers.rcu(|current| {
            let mut drivers = DriverMap::clone(current);
            drivers.insert(id.clone(), driver.clone());
            drivers
        });
        info!(cdn = %id, kind = %driver.kind(), active = driver.is_active(), "cdn instance updated");
    }

    /// Drop the driver for `id`. Its topology refresh stops once the last request
    /// holding it finishes.
    pub fn remove(&self, id: &str) {
        self.drivers.rcu(|current| {
            let mut drivers = DriverMap::clone(current);
            drivers.remove(id);
            drivers
        });
        info!(cdn = %id, "cdn instance removed");
    }

    /// Driver for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<CdnDriver>> {
        self.drivers.load().get(id).cloned()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.load().len()
    }

    /// Whether no drivers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn topology_for(
        &self,
        config: &CdnInstanceConfig,
        previous: Option<&CdnDriver>,
    ) -> Option<Arc<NetworkClassifier>> {
        let alto = config.whitelist.as_ref()?.alto.clone()?;
        let existing = previous
            .and_then(|driver| driver.whitelist().topology())
            .cloned();

        match existing {
            Some(classifier) => {
                if classifier.reconfigure(alto) {
                    debug!(cdn = %config.id, "topology source reconfigured");
                }
                Some(classifier)
            }
            None => {
                let classifier = Arc::new(NetworkClassifier::new(alto, self.client.clone()));
                // Detached; the loop exits once the classifier is dropped.
                drop(classifier.spawn());
                Some(classifier)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cdn::{AltoConfig, DriverKind, WhitelistConfig};

    fn config(id: &str, alto: Option<AltoConfig>) -> CdnInstanceConfig {
        CdnInstanceConfig {
            id: id.into(),
            name: None,
            driver: DriverKind::Generic,
            active: true,
            whitelist: Some(WhitelistConfig {
                ranges: vec!["10.0.0.0/8".into()],
                alto,
            }),
            routing_service: None,
        }
    }

    fn alto(url: &str) -> AltoConfig {
        AltoConfig {
            url: url.into(),
            network_map_id: None,
            ignore_pids: Vec::new(),
            refresh_interval: 3600,
        }
    }

    #[test]
    fn apply_updates_and_deletes() {
        let registry = DriverRegistry::new(reqwest::Client::new());
        registry.apply(ChangeEvent::Updated {
            id: "a".into(),
            doc: config("a", None),
        });
        registry.apply(ChangeEvent::Updated {
            id: "b".into(),
            doc: config("b", None),
        });
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").unwrap().is_client_ip_whitelisted("10.1.2.3".parse().unwrap()));

        registry.apply(ChangeEvent::Deleted { id: "a".into() });
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn classifier_is_reused_across_updates() {
        let registry = DriverRegistry::new(reqwest::Client::new());
        registry.upsert(config("a", Some(alto("http://127.0.0.1:9/directory"))));
        let first = registry.get("a").unwrap().whitelist().topology().cloned().unwrap();

        registry.upsert(config("a", Some(alto("http://127.0.0.1:9/other"))));
        let second = registry.get("a").unwrap().whitelist().topology().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().url, "http://127.0.0.1:9/other");

        registry.upsert(config("a", None));
        assert!(registry.get("a").unwrap().whitelist().topology().is_none());
    }
}
