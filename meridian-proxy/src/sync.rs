//! Config feed listener: applies store changes to the live catalog and driver
//! registry.

use std::sync::Arc;

use meridian_config::{ConfigChange, ConfigStore};
use meridian_core::{DistributionCatalog, DriverRegistry};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Apply one change.
pub fn apply(catalog: &DistributionCatalog, registry: &DriverRegistry, change: ConfigChange) {
    match change {
        ConfigChange::Distribution(event) => {
            debug!(distribution = %event.id(), "distribution change");
            catalog.apply(event);
        }
        ConfigChange::Cdn(event) => {
            debug!(cdn = %event.id(), "cdn change");
            registry.apply(event);
        }
    }
}

/// Apply every change from `changes` until the stream ends.
pub async fn follow<S>(changes: S, catalog: Arc<DistributionCatalog>, registry: Arc<DriverRegistry>)
where
    S: Stream<Item = ConfigChange> + Unpin,
{
    let mut changes = changes;
    while let Some(change) = changes.next().await {
        apply(&catalog, &registry, change);
    }
    info!("config feed closed");
}

/// Subscribe to `store` and follow it in the background. The snapshot is applied
/// before this returns, so the catalog is populated as soon as the server starts.
pub fn spawn_config_listener(
    store: &dyn ConfigStore,
    catalog: Arc<DistributionCatalog>,
    registry: Arc<DriverRegistry>,
) -> JoinHandle<()> {
    let (replay, changes) = store.subscribe().into_replay();
    for change in replay {
        apply(&catalog, &registry, change);
    }
    info!(
        distributions = catalog.len(),
        cdns = registry.len(),
        "configuration loaded"
    );
    tokio::spawn(follow(changes, catalog, registry))
}
