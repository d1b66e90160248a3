//! In-memory configuration store.

use std::collections::BTreeMap;

use meridian_core::domain::request::normalize_host;
use meridian_core::{CdnInstanceConfig, ChangeEvent, Distribution};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::seed::ConfigSeed;
use crate::{ConfigChange, ConfigStore, Subscription};

#[derive(Debug, Default)]
struct State {
    distributions: BTreeMap<String, Distribution>,
    cdns: BTreeMap<String, CdnInstanceConfig>,
    subscribers: Vec<mpsc::UnboundedSender<ConfigChange>>,
}

impl State {
    fn publish(&mut self, change: ConfigChange) {
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
    }
}

/// Configuration store kept in process memory.
///
/// Writes are published to subscribers while the write lock is held, so every
/// subscriber sees changes in write order and none is missed between its snapshot
/// and its first change.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    state: RwLock<State>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from a seed.
    pub fn from_seed(seed: ConfigSeed) -> Self {
        let store = Self::new();
        for cdn in seed.cdns {
            store.put_cdn(cdn);
        }
        for distribution in seed.distributions {
            store.put_distribution(distribution);
        }
        store
    }

    /// Insert or replace a distribution.
    pub fn put_distribution(&self, distribution: Distribution) {
        let mut state = self.state.write();
        let id = distribution.id.clone();
        state.distributions.insert(id.clone(), distribution.clone());
        state.publish(ConfigChange::Distribution(ChangeEvent::Updated {
            id,
            doc: distribution,
        }));
    }

    /// Delete a distribution. Returns whether it existed.
    pub fn delete_distribution(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let existed = state.distributions.remove(id).is_some();
        if existed {
            state.publish(ConfigChange::Distribution(ChangeEvent::Deleted {
                id: id.to_string(),
            }));
        }
        existed
    }

    /// Insert or replace a CDN instance.
    pub fn put_cdn(&self, cdn: CdnInstanceConfig) {
        let mut state = self.state.write();
        let id = cdn.id.clone();
        state.cdns.insert(id.clone(), cdn.clone());
        state.publish(ConfigChange::Cdn(ChangeEvent::Updated { id, doc: cdn }));
    }

    /// Delete a CDN instance. Returns whether it existed.
    pub fn delete_cdn(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let existed = state.cdns.remove(id).is_some();
        if existed {
            state.publish(ConfigChange::Cdn(ChangeEvent::Deleted { id: id.to_string() }));
        }
        existed
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.write();
        state.subscribers.retain(|s| !s.is_closed());
        state.subscribers.len()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn distribution_by_hostname(&self, host: &str) -> Option<Distribution> {
        let host = normalize_host(host);
        self.state
            .read()
            .distributions
            .values()
            .find(|d| d.serves_host(&host))
            .cloned()
    }

    fn distribution(&self, id: &str) -> Option<Distribution> {
        self.state.read().distributions.get(id).cloned()
    }

    fn cdn(&self, id: &str) -> Option<CdnInstanceConfig> {
        self.state.read().cdns.get(id).cloned()
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write();
        let snapshot = ConfigSeed {
            distributions: state.distributions.values().cloned().collect(),
            cdns: state.cdns.values().cloned().collect(),
        };
        state.subscribers.push(tx);
        debug!(
            distributions = snapshot.distributions.len(),
            cdns = snapshot.cdns.len(),
            "config subscriber attached"
        );
        Subscription {
            snapshot,
            changes: UnboundedReceiverStream::new(rx),
        }
    }
}
