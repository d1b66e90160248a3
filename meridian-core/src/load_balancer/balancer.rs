//! Target-share balancer.
//!
//! Each distribution keeps a window of usage counters. `balance` ranks providers by
//! how far their observed share lags behind their configured target share, so the
//! provider that is most "owed" traffic is tried first. The window is dropped
//! wholesale every period, which bounds how long a past outage of one provider can
//! skew the ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use super::window::UsageCounters;
use crate::domain::distribution::{Distribution, SelectionMode};
use crate::selector::Candidate;

/// Default length of a balancing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

/// Bonus that puts a whitelisted client's preferred provider ahead of any share
/// deficit.
const WHITELIST_BONUS: f64 = 200.0;

type Window = DashMap<String, Arc<UsageCounters>>;

/// Per-request inputs to [`LoadBalancer::balance`].
#[derive(Debug, Clone, Default)]
pub struct BalanceOptions {
    /// Provider id → the client is inside that provider's whitelist.
    pub whitelist_allowed: HashMap<String, bool>,
}

impl BalanceOptions {
    /// Options derived from the selector's candidates.
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        Self {
            whitelist_allowed: candidates
                .iter()
                .map(|c| (c.provider.id.clone(), c.whitelisted))
                .collect(),
        }
    }
}

/// In-process load balancer. Counters are not shared between processes.
#[derive(Debug)]
pub struct LoadBalancer {
    window: ArcSwap<Window>,
    period: Duration,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl LoadBalancer {
    /// Create a balancer whose counters reset every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            window: ArcSwap::from_pointee(DashMap::new()),
            period,
        }
    }

    /// Reset period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Reorder `candidates` for `distribution`. Only distributions in
    /// load-balance mode are touched; the order of providers without a
    /// load-balancer config, and of equal scores, is kept.
    pub fn balance(
        &self,
        candidates: &mut Vec<Candidate>,
        distribution: &Distribution,
        options: &BalanceOptions,
    ) {
        if distribution.selection_mode != SelectionMode::LoadBalance || candidates.len() < 2 {
            return;
        }

        let counters = self.usage(&distribution.id);
        let mut scored: Vec<(Option<f64>, Candidate)> = std::mem::take(candidates)
            .into_iter()
            .map(|candidate| (self.score(&candidate, counters.as_deref(), options), candidate))
            .collect();

        scored.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => b.partial_cmp(a).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        debug!(
            distribution = %distribution.id,
            order = ?scored.iter().map(|(s, c)| (c.id(), *s)).collect::<Vec<_>>(),
            "balanced candidates"
        );
        candidates.extend(scored.into_iter().map(|(_, candidate)| candidate));
    }

    fn score(
        &self,
        candidate: &Candidate,
        counters: Option<&UsageCounters>,
        options: &BalanceOptions,
    ) -> Option<f64> {
        let config = candidate.provider.load_balancer.as_ref()?;
        let actual = counters.map_or(0.0, |c| c.share_percent(candidate.id()));
        let mut score = config.target_load_percent - actual;
        let whitelisted = options
            .whitelist_allowed
            .get(candidate.id())
            .copied()
            .unwrap_or(false);
        if whitelisted && config.always_use_for_whitelisted_clients {
            score += WHITELIST_BONUS;
        }
        Some(score)
    }

    /// Count one request actually served by `cdn` for `distribution`.
    pub fn notify_cdn_usage(&self, cdn: &str, distribution: &str) {
        let window = self.window.load();
        let counters = window
            .get(distribution)
            .map(|counters| counters.value().clone())
            .unwrap_or_else(|| {
                window
                    .entry(distribution.to_string())
                    .or_insert_with(|| Arc::new(UsageCounters::new()))
                    .value()
                    .clone()
            });
        counters.record(cdn);
    }

    /// Counters of `distribution` in the current window.
    pub fn usage(&self, distribution: &str) -> Option<Arc<UsageCounters>> {
        self.window.load().get(distribution).map(|c| c.value().clone())
    }

    /// Start a new window.
    pub fn reset(&self) {
        self.window.store(Arc::new(DashMap::new()));
    }

    /// Reset the window every period in the background. The task ends once the
    /// balancer is dropped.
    pub fn spawn_reset_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let balancer = Arc::downgrade(self);
        let period = self.period;

        tokio::spawn(async move {
            let mut interval = time::interval(period);

            // Skip the immediate first tick
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(balancer) = balancer.upgrade() else {
                    break;
                };
                balancer.reset();
                debug!("load balancer window reset");
            }
        })
    }
}
