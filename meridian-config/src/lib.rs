//! Meridian configuration store.
//!
//! Distributions and CDN instances live in an external document store; the router
//! only keeps an eventually consistent cache of them. This crate defines the
//! interface to that store ([`ConfigStore`]), an in-memory implementation with a
//! change feed ([`MemoryConfigStore`]) and JSON seed files ([`ConfigSeed`]).

pub mod error;
pub mod memory;
pub mod seed;

use meridian_core::{CdnInstanceConfig, ChangeEvent, Distribution};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub use error::ConfigError;
pub use memory::MemoryConfigStore;
pub use seed::ConfigSeed;

/// One change on the configuration feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    /// A distribution was written or deleted.
    Distribution(ChangeEvent<Distribution>),
    /// A CDN instance was written or deleted.
    Cdn(ChangeEvent<CdnInstanceConfig>),
}

/// Current state plus the changes that follow it.
#[derive(Debug)]
pub struct Subscription {
    /// Everything stored at the moment of subscribing.
    pub snapshot: ConfigSeed,
    /// Changes made after the snapshot, in write order.
    pub changes: UnboundedReceiverStream<ConfigChange>,
}

impl Subscription {
    /// Split into the snapshot replayed as updates (CDN instances first, so
    /// distributions never reference a driver that is not loaded yet) and the
    /// live changes that follow it.
    pub fn into_replay(self) -> (Vec<ConfigChange>, UnboundedReceiverStream<ConfigChange>) {
        let ConfigSeed {
            distributions,
            cdns,
        } = self.snapshot;
        let replay = cdns
            .into_iter()
            .map(|doc| {
                ConfigChange::Cdn(ChangeEvent::Updated {
                    id: doc.id.clone(),
                    doc,
                })
            })
            .chain(distributions.into_iter().map(|doc| {
                ConfigChange::Distribution(ChangeEvent::Updated {
                    id: doc.id.clone(),
                    doc,
                })
            }))
            .collect();
        (replay, self.changes)
    }
}

/// Read access to the configuration documents plus a change feed.
pub trait ConfigStore: Send + Sync {
    /// Distribution serving `host`.
    fn distribution_by_hostname(&self, host: &str) -> Option<Distribution>;

    /// Distribution by id.
    fn distribution(&self, id: &str) -> Option<Distribution>;

    /// CDN instance by id.
    fn cdn(&self, id: &str) -> Option<CdnInstanceConfig>;

    /// Subscribe to the current state and every later change.
    fn subscribe(&self) -> Subscription;
}
