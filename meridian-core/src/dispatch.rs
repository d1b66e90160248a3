//! Request dispatch: select candidates, check the inbound token once, then try the
//! candidates in order until one yields a surrogate.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::access_log::{AccessLogEntry, AccessLogger};
use crate::domain::distribution::Distribution;
use crate::domain::request::{strip_query_params, RequestContext};
use crate::load_balancer::balancer::{BalanceOptions, LoadBalancer};
use crate::selector::{Candidate, CdnSelector};
use crate::token::{extract_inbound, CodecSettings, NormalizedToken};

/// What to answer the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Send the client to a CDN.
    Redirect {
        /// Redirect target.
        location: Url,
    },
    /// The inbound token was present but invalid.
    Unauthorized,
    /// No provider could serve the request.
    Unavailable,
}

impl Disposition {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Disposition::Redirect { .. } => 302,
            Disposition::Unauthorized => 401,
            Disposition::Unavailable => 503,
        }
    }

    /// Response body.
    pub fn body(&self) -> &'static str {
        match self {
            Disposition::Redirect { .. } => "",
            Disposition::Unauthorized => "Unauthorized",
            Disposition::Unavailable => "Service Unavailable",
        }
    }
}

/// Per-request pipeline tying selector, balancer, token codecs and drivers
/// together.
#[derive(Clone)]
pub struct Dispatcher {
    selector: CdnSelector,
    balancer: Arc<LoadBalancer>,
    access_log: Arc<dyn AccessLogger>,
}

struct Outcome {
    disposition: Disposition,
    request_url: Url,
    chosen_cdn: Option<String>,
    preferred_cdn: Option<String>,
    location: Option<String>,
}

impl Outcome {
    fn new(disposition: Disposition, request_url: Url) -> Self {
        Self {
            disposition,
            request_url,
            chosen_cdn: None,
            preferred_cdn: None,
            location: None,
        }
    }
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        selector: CdnSelector,
        balancer: Arc<LoadBalancer>,
        access_log: Arc<dyn AccessLogger>,
    ) -> Self {
        Self {
            selector,
            balancer,
            access_log,
        }
    }

    /// Shared load balancer.
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Decide where `request` goes. Every call produces one access log entry.
    pub async fn dispatch(&self, request: &RequestContext) -> Disposition {
        let outcome = self.route(request).await;
        self.log(request, &outcome);
        outcome.disposition
    }

    async fn route(&self, request: &RequestContext) -> Outcome {
        let client_ip = request.client_ip();
        let selection = self.selector.select(client_ip, &request.host);
        let Some(distribution) = selection.distribution else {
            return Outcome::new(Disposition::Unavailable, request.url.clone());
        };
        let mut candidates = selection.candidates;
        if candidates.is_empty() {
            debug!(distribution = %distribution.id, %client_ip, "no eligible cdn");
            return Outcome::new(Disposition::Unavailable, request.url.clone());
        }

        let options = BalanceOptions::from_candidates(&candidates);
        self.balancer.balance(&mut candidates, &distribution, &options);

        let token = inbound_token(request, &distribution, &candidates);
        let mut request_url = request.url.clone();
        strip_query_params(&mut request_url, &token.auth_params);

        let mut outcome = Outcome::new(Disposition::Unavailable, request_url);
        outcome.preferred_cdn = candidates.first().map(|c| c.id().to_string());

        if token.is_present && !token.is_valid {
            debug!(distribution = %distribution.id, %client_ip, "rejecting invalid token");
            outcome.disposition = Disposition::Unauthorized;
            return outcome;
        }

        for candidate in &candidates {
            let surrogate = match candidate
                .driver
                .select_surrogate(request, &distribution, &token)
                .await
            {
                Ok(surrogate) => surrogate,
                Err(error) => {
                    warn!(cdn = %candidate.id(), distribution = %distribution.id, %error, "cdn failed, trying next");
                    continue;
                }
            };
            let Some(target) = surrogate.target_url else {
                debug!(cdn = %candidate.id(), "cdn yielded no surrogate, trying next");
                continue;
            };

            self.balancer.notify_cdn_usage(candidate.id(), &distribution.id);
            outcome.disposition = Disposition::Redirect { location: target };
            outcome.request_url = surrogate.request_url;
            outcome.chosen_cdn = Some(candidate.id().to_string());
            outcome.location = surrogate.location;
            return outcome;
        }

        warn!(distribution = %distribution.id, candidates = candidates.len(), "all cdns exhausted");
        outcome
    }

    fn log(&self, request: &RequestContext, outcome: &Outcome) {
        let target_url = match &outcome.disposition {
            Disposition::Redirect { location } => Some(location.to_string()),
            _ => None,
        };
        self.access_log.log(&AccessLogEntry {
            protocol: request.protocol.clone(),
            client_ip: request.client.ip(),
            client_port: request.client.port(),
            request_url: outcome.request_url.to_string(),
            chosen_cdn: outcome.chosen_cdn.clone(),
            status: outcome.disposition.status(),
            target_url,
            preferred_cdn: outcome.preferred_cdn.clone(),
            location: outcome.location.clone(),
            user_agent: request.user_agent.clone(),
            server_ip: request.server.ip(),
            server_port: request.server.port(),
        });
    }
}

/// Extract the inbound token once: the distribution's own auth block first, then
/// each candidate's codec with that provider's settings.
fn inbound_token(
    request: &RequestContext,
    distribution: &Distribution,
    candidates: &[Candidate],
) -> NormalizedToken {
    let own = distribution
        .auth
        .as_ref()
        .map(|auth| (auth.scheme, CodecSettings::from_auth(auth)));
    let providers = candidates.iter().filter_map(|candidate| {
        candidate
            .driver
            .codec()
            .map(|scheme| (scheme, CodecSettings::from_provider(&candidate.provider)))
    });
    extract_inbound(request, own.into_iter().chain(providers))
}
