//! Meridian Proxy Engine
//!
//! Wires the routing core into a running process: the HTTP/1.1 redirect server
//! with optional TLS, process configuration, the config feed listener and the
//! background timers.

pub mod config;
pub mod error;
pub mod server;
pub mod sync;
pub mod tls;

use std::sync::Arc;

use meridian_config::ConfigStore;
use meridian_core::{
    AccessLogger, CdnSelector, Dispatcher, DistributionCatalog, DriverRegistry, LoadBalancer,
};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::server::ServerState;

/// The live routing state of one process.
pub struct Gateway {
    catalog: Arc<DistributionCatalog>,
    registry: Arc<DriverRegistry>,
    balancer: Arc<LoadBalancer>,
    dispatcher: Dispatcher,
    trust_forwarded_for: bool,
}

impl Gateway {
    /// Build empty routing state for `config`, logging requests to `access_log`.
    pub fn new(config: &ProxyConfig, access_log: Arc<dyn AccessLogger>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(config.outbound.timeout())
            .build()?;
        let catalog = Arc::new(DistributionCatalog::default());
        let registry = Arc::new(DriverRegistry::new(client));
        let balancer = Arc::new(LoadBalancer::new(config.load_balancer.window()));
        let dispatcher = Dispatcher::new(
            CdnSelector::new(catalog.clone(), registry.clone()),
            balancer.clone(),
            access_log,
        );
        Ok(Self {
            catalog,
            registry,
            balancer,
            dispatcher,
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }

    /// Load `store`'s current state and follow its changes.
    pub fn attach(&self, store: &dyn ConfigStore) -> JoinHandle<()> {
        sync::spawn_config_listener(store, self.catalog.clone(), self.registry.clone())
    }

    /// Start the load balancer's window reset timer.
    pub fn spawn_timers(&self) -> JoinHandle<()> {
        self.balancer.spawn_reset_timer()
    }

    /// State handed to the HTTP server.
    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState::new(self.dispatcher.clone(), self.trust_forwarded_for))
    }
}
