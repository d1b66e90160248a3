//! Usage counters for one distribution within the current balancing window.
//!
//! Counters only ever grow; the balancer discards the whole window when it resets,
//! so no decrement or decay logic is needed here.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Served-request counts for one distribution: a total plus one counter per
/// provider.
#[derive(Debug, Default)]
pub struct UsageCounters {
    /// Requests served by any provider.
    total: AtomicU64,

    /// Requests served per provider id.
    per_provider: DashMap<String, AtomicU64>,
}

impl UsageCounters {
    /// Empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request served by `provider`.
    pub fn record(&self, provider: &str) {
        let counted = self
            .per_provider
            .get(provider)
            .map(|counter| counter.fetch_add(1, Ordering::Relaxed))
            .is_some();
        if !counted {
            self.per_provider
                .entry(provider.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served in this window.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Requests `provider` served in this window.
    pub fn count(&self, provider: &str) -> u64 {
        self.per_provider
            .get(provider)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Share of traffic `provider` served, in percent. `0` before any traffic.
    pub fn share_percent(&self, provider: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        100.0 * self.count(provider) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shares_follow_counts() {
        let counters = UsageCounters::new();
        assert_eq!(counters.share_percent("a"), 0.0);

        counters.record("a");
        counters.record("a");
        counters.record("a");
        counters.record("b");
        assert_eq!(counters.total(), 4);
        assert_eq!(counters.count("a"), 3);
        assert_eq!(counters.share_percent("a"), 75.0);
        assert_eq!(counters.share_percent("c"), 0.0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let counters = Arc::new(UsageCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record(if i % 2 == 0 { "even" } else { "odd" });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.total(), 4000);
        assert_eq!(counters.count("even"), 2000);
    }
}
