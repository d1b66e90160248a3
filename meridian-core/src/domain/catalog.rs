//! Lock-free lookup table of distributions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use super::distribution::Distribution;
use super::request::normalize_host;
use super::ChangeEvent;

#[derive(Debug, Default)]
struct CatalogSnapshot {
    by_id: BTreeMap<String, Arc<Distribution>>,
    by_host: HashMap<String, Arc<Distribution>>,
}

impl CatalogSnapshot {
    fn index(by_id: BTreeMap<String, Arc<Distribution>>) -> Self {
        let mut by_host = HashMap::new();
        for dist in by_id.values() {
            for host in &dist.hostnames {
                let host = normalize_host(host);
                if let Some(previous) = by_host.insert(host.clone(), dist.clone()) {
                    warn!(
                        host = %host,
                        kept = %dist.id,
                        dropped = %previous.id,
                        "hostname claimed by more than one distribution"
                    );
                }
            }
        }
        Self { by_id, by_host }
    }
}

/// A lock-free table of distributions, indexed by id and by hostname.
///
/// Uses `ArcSwap` so that configuration updates replace the whole index at once;
/// a request never observes a half-applied change.
#[derive(Debug, Default)]
pub struct DistributionCatalog {
    snapshot: ArcSwap<CatalogSnapshot>,
}

impl DistributionCatalog {
    /// Create a catalog holding the given distributions.
    pub fn new(initial: Vec<Distribution>) -> Self {
        let by_id = initial
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        Self {
            snapshot: ArcSwap::from_pointee(CatalogSnapshot::index(by_id)),
        }
    }

    /// Apply one change from the configuration feed.
    pub fn apply(&self, event: ChangeEvent<Distribution>) {
        match event {
            ChangeEvent::Updated { doc, .. } => self.upsert(doc),
            ChangeEvent::Deleted { id } => self.remove(&id),
        }
    }

    /// Insert or replace a distribution.
    pub fn upsert(&self, distribution: Distribution) {
        let id = distribution.id.clone();
        let distribution = Arc::new(distribution);
        self.snapshot.rcu(|current| {
            let mut by_id = current.by_id.clone();
            by_id.insert(id.clone(), distribution.clone());
            CatalogSnapshot::index(by_id)
        });
        info!(distribution = %id, "distribution updated");
    }

    /// Remove a distribution; unknown ids are ignored.
    pub fn remove(&self, id: &str) {
        self.snapshot.rcu(|current| {
            let mut by_id = current.by_id.clone();
            by_id.remove(id);
            CatalogSnapshot::index(by_id)
        });
        info!(distribution = %id, "distribution removed");
    }

    /// Distribution serving `host` (any case, port allowed).
    pub fn by_hostname(&self, host: &str) -> Option<Arc<Distribution>> {
        self.snapshot.load().by_host.get(&normalize_host(host)).cloned()
    }

    /// Distribution by id.
    pub fn get(&self, id: &str) -> Option<Arc<Distribution>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    /// Number of distributions.
    pub fn len(&self) -> usize {
        self.snapshot.load().by_id.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(id: &str, hosts: &[&str]) -> Distribution {
        Distribution {
            id: id.to_string(),
            hostnames: hosts.iter().map(|h| h.to_string()).collect(),
            selection_mode: Default::default(),
            auth: None,
            providers: Vec::new(),
        }
    }

    #[test]
    fn lookup_by_host_ignores_case_and_port() {
        let catalog = DistributionCatalog::new(vec![dist("d1", &["Media.Example.com"])]);
        assert_eq!(catalog.by_hostname("media.example.com:8080").unwrap().id, "d1");
        assert!(catalog.by_hostname("other.example.com").is_none());
    }

    #[test]
    fn updates_replace_host_index() {
        let catalog = DistributionCatalog::new(vec![dist("d1", &["a.example.com"])]);
        catalog.apply(ChangeEvent::Updated {
            id: "d1".into(),
            doc: dist("d1", &["b.example.com"]),
        });
        assert!(catalog.by_hostname("a.example.com").is_none());
        assert_eq!(catalog.by_hostname("b.example.com").unwrap().id, "d1");

        catalog.apply(ChangeEvent::Deleted { id: "d1".into() });
        assert!(catalog.is_empty());
        assert!(catalog.by_hostname("b.example.com").is_none());
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let catalog = DistributionCatalog::new(vec![dist("d1", &["a.example.com"])]);
        let held = catalog.get("d1").unwrap();
        catalog.remove("d1");
        assert_eq!(held.hostnames, vec!["a.example.com".to_string()]);
        assert!(catalog.get("d1").is_none());
    }
}
