//! CDN drivers.
//!
//! One driver per configured CDN instance. All variants share a single selection
//! algorithm and differ only in how the target URL is resolved (static host
//! substitution or the Velocix routing service) and which token codec mints the
//! outbound token.

pub mod registry;
pub mod routing_service;

use std::net::IpAddr;

use tracing::{debug, warn};
use url::Url;

use self::routing_service::RoutingServiceClient;
use crate::domain::cdn::{CdnInstanceConfig, DriverKind};
use crate::domain::distribution::{Distribution, Provider};
use crate::domain::request::{
    normalize_host, replace_query_params, strip_query_params, RequestContext,
};
use crate::error::DriverError;
use crate::net::whitelist::ProviderWhitelist;
use crate::token::{unix_now, CodecSettings, NormalizedToken, TokenScheme};

/// How a driver turns the request URL into a target URL.
#[derive(Debug, Clone)]
pub enum TargetResolver {
    /// Substitute the provider hostname into the request URL.
    Static,
    /// Ask an external routing service.
    RoutingService(RoutingServiceClient),
}

/// Outcome of [`CdnDriver::select_surrogate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surrogate {
    /// The request URL with the inbound token removed.
    pub request_url: Url,
    /// Where to redirect the client; `None` means try the next candidate.
    pub target_url: Option<Url>,
    /// Location reported by the resolver.
    pub location: Option<String>,
}

impl Surrogate {
    fn none(request_url: Url) -> Self {
        Self {
            request_url,
            target_url: None,
            location: None,
        }
    }
}

/// A live CDN instance.
#[derive(Debug)]
pub struct CdnDriver {
    config: CdnInstanceConfig,
    whitelist: ProviderWhitelist,
    resolver: TargetResolver,
}

impl CdnDriver {
    /// Create a driver. The Velocix variant needs `routingService` configured;
    /// without it the driver falls back to static substitution.
    pub fn new(
        config: CdnInstanceConfig,
        whitelist: ProviderWhitelist,
        client: reqwest::Client,
    ) -> Self {
        let resolver = match (config.driver, &config.routing_service) {
            (DriverKind::Velocix, Some(service)) => match Url::parse(&service.url) {
                Ok(endpoint) => {
                    TargetResolver::RoutingService(RoutingServiceClient::new(endpoint, client))
                }
                Err(error) => {
                    warn!(cdn = %config.id, url = %service.url, %error, "invalid routing service url, using static substitution");
                    TargetResolver::Static
                }
            },
            (DriverKind::Velocix, None) => {
                warn!(cdn = %config.id, "velocix driver without routing service, using static substitution");
                TargetResolver::Static
            }
            _ => TargetResolver::Static,
        };
        Self {
            config,
            whitelist,
            resolver,
        }
    }

    /// CDN instance id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Driver variant.
    pub fn kind(&self) -> DriverKind {
        self.config.driver
    }

    /// Raw configuration this driver was built from.
    pub fn config(&self) -> &CdnInstanceConfig {
        &self.config
    }

    /// Client whitelist.
    pub fn whitelist(&self) -> &ProviderWhitelist {
        &self.whitelist
    }

    /// Token codec used for outbound tokens.
    pub fn codec(&self) -> Option<TokenScheme> {
        self.config.driver.token_scheme()
    }

    /// Whether the instance is switched on.
    pub fn is_active(&self) -> bool {
        self.config.active
    }

    /// Whether a client at `ip` may be sent to this CDN.
    pub fn is_client_ip_allowed(&self, ip: IpAddr) -> bool {
        self.whitelist.allows(ip)
    }

    /// Whether `ip` is explicitly inside this CDN's whitelist (not merely allowed
    /// because no whitelist is configured).
    pub fn is_client_ip_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist.is_configured() && self.whitelist.contains(ip)
    }

    /// Resolve where `request` should be redirected for `distribution`.
    ///
    /// `token` is the request's inbound token, extracted once by the caller. A
    /// driver with no entry in the distribution answers with no target rather than
    /// an error.
    pub async fn select_surrogate(
        &self,
        request: &RequestContext,
        distribution: &Distribution,
        token: &NormalizedToken,
    ) -> Result<Surrogate, DriverError> {
        let mut request_url = request.url.clone();
        strip_query_params(&mut request_url, &token.auth_params);

        let Some(provider) = distribution.provider(self.id()) else {
            debug!(cdn = %self.id(), distribution = %distribution.id, "cdn not part of distribution");
            return Ok(Surrogate::none(request_url));
        };
        if token.is_present && !token.is_valid {
            return Err(DriverError::InvalidToken);
        }

        let settings = CodecSettings::from_provider(provider);
        let (mut target, location) = match &self.resolver {
            TargetResolver::Static => match substitute_host(&request_url, provider)? {
                Some(target) if !points_back_at(&target, &request_url) => (target, None),
                _ => {
                    debug!(cdn = %self.id(), "provider hostname would redirect to the router itself");
                    return Ok(Surrogate::none(request_url));
                }
            },
            TargetResolver::RoutingService(service) => {
                match service.resolve(&request_url, request.client_ip()).await {
                    Ok(Some(routed)) => (routed.url, routed.location),
                    Ok(None) => {
                        debug!(cdn = %self.id(), "routing service offered no surrogate");
                        return Ok(Surrogate::none(request_url));
                    }
                    Err(error) => {
                        warn!(cdn = %self.id(), endpoint = %service.endpoint(), %error, "routing service failed");
                        return Ok(Surrogate::none(request_url));
                    }
                }
            }
        };

        if let (TargetResolver::RoutingService(_), Some(cookie)) = (&self.resolver, &token.cookie) {
            let param = TokenScheme::Velocix.auth_param(settings);
            replace_query_params(&mut target, &[(param, cookie.clone())]);
        }

        if let Some(scheme) = self.codec() {
            let mint = scheme.can_mint(settings)
                && ((token.is_present && token.is_valid)
                    || (!token.is_present && scheme.signs_every_url()));
            if mint {
                let normalized = token.normalized_for(&target, unix_now());
                let minted = scheme.mint(&target, &normalized, settings, request.client_ip())?;
                minted.apply_to(&mut target);
                debug!(cdn = %self.id(), scheme = scheme.as_str(), "minted outbound token");
            }
        }

        Ok(Surrogate {
            request_url,
            target_url: Some(target),
            location,
        })
    }
}

/// Put the provider's host (or base URL) onto `url`. `None` when the provider has
/// no hostname.
fn substitute_host(url: &Url, provider: &Provider) -> Result<Option<Url>, DriverError> {
    let Some(hostname) = provider.hostname.as_deref().filter(|h| !h.trim().is_empty()) else {
        return Ok(None);
    };
    let invalid = || DriverError::InvalidHostname(hostname.to_string());

    let base = if hostname.contains("://") {
        Url::parse(hostname)
    } else {
        Url::parse(&format!("{}://{}", url.scheme(), hostname.trim()))
    }
    .map_err(|_| invalid())?;

    let mut target = url.clone();
    target.set_scheme(base.scheme()).map_err(|_| invalid())?;
    target.set_host(base.host_str()).map_err(|_| invalid())?;
    target.set_port(base.port()).map_err(|_| invalid())?;
    Ok(Some(target))
}

fn points_back_at(target: &Url, request_url: &Url) -> bool {
    target.host_str().map(normalize_host) == request_url.host_str().map(normalize_host)
        && target.port_or_known_default() == request_url.port_or_known_default()
}
