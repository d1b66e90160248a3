//! Distribution documents: which hostnames map onto which CDN providers.

use serde::{Deserialize, Serialize};

use super::cdn::DriverKind;
use super::default_true;
use super::request::normalize_host;
use crate::token::TokenScheme;

/// How the candidate list of a distribution is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Providers are tried in configured order.
    #[default]
    #[serde(rename = "failover")]
    Failover,
    /// Providers are reordered by target-vs-actual traffic share.
    #[serde(rename = "loadbalance", alias = "loadBalance")]
    LoadBalance,
}

/// Maps a set of hostnames onto a prioritized list of providers.
///
/// Replaced wholesale on every change; a request holds on to the snapshot it read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Unique id.
    pub id: String,
    /// Hostnames served by this distribution.
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Ordering policy for providers.
    #[serde(default)]
    pub selection_mode: SelectionMode,
    /// Tokens presented to this edge by clients.
    #[serde(default)]
    pub auth: Option<InboundAuth>,
    /// Candidate providers in priority order.
    #[serde(default)]
    pub providers: Vec<Provider>,
}

impl Distribution {
    /// Find the entry for a CDN instance id.
    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Whether `host` (any case, port allowed) is served by this distribution.
    pub fn serves_host(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.hostnames.iter().any(|h| normalize_host(h) == host)
    }
}

/// One provider entry inside a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Id of the CDN instance this entry routes to.
    pub id: String,
    /// Informational driver annotation; the CDN instance's own driver wins.
    #[serde(default)]
    pub driver: Option<DriverKind>,
    /// Inactive entries are never selected.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Host (or absolute base URL) substituted into the request URL.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Load balancing parameters.
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    /// Shared-secret token parameters for this provider.
    #[serde(default)]
    pub token_config: Option<TokenConfig>,
    /// Signed URL parameters for this provider.
    #[serde(default)]
    pub signed_url_config: Option<SignedUrlConfig>,
}

/// Load balancing parameters of a provider entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    /// Desired share of the distribution's traffic, in percent.
    #[serde(default)]
    pub target_load_percent: f64,
    /// Prefer this provider for clients inside its whitelist regardless of share.
    #[serde(default)]
    pub always_use_for_whitelisted_clients: bool,
}

/// Parameters for the HMAC based token schemes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    /// Query parameter carrying the token.
    #[serde(default)]
    pub auth_param: Option<String>,
    /// Secrets tried in order when validating; the first one signs.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Hash function name, `sha256` when absent.
    #[serde(default)]
    pub hash_fn: Option<String>,
    /// Salt appended to the signing input.
    #[serde(default)]
    pub hash_salt: Option<String>,
}

/// Parameters for RSA signed URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlConfig {
    /// Key pair id announced in `Key-Pair-Id`.
    pub key_pair_id: String,
    /// PEM encoded RSA private key (PKCS#1 or PKCS#8).
    pub private_key: String,
}

/// Token scheme clients use when talking to this edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundAuth {
    /// Codec used to read the inbound token.
    pub scheme: TokenScheme,
    /// Shared-secret parameters.
    #[serde(default)]
    pub token_config: Option<TokenConfig>,
    /// Signed URL parameters.
    #[serde(default)]
    pub signed_url_config: Option<SignedUrlConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_document() {
        let doc = serde_json::json!({
            "id": "dist-1",
            "hostnames": ["Media.Example.com"],
            "selectionMode": "loadbalance",
            "providers": [
                {
                    "id": "velocix-1",
                    "hostname": "edge.velocix.example",
                    "loadBalancer": { "targetLoadPercent": 75, "alwaysUseForWhitelistedClients": true },
                    "tokenConfig": { "authParam": "authToken", "secrets": ["s3cr3t"] }
                },
                { "id": "amazon-1", "active": false }
            ]
        });
        let dist: Distribution = serde_json::from_value(doc).unwrap();

        assert_eq!(dist.selection_mode, SelectionMode::LoadBalance);
        assert!(dist.serves_host("media.example.com:8080"));
        assert!(dist.providers[0].active);
        assert!(!dist.providers[1].active);
        let lb = dist.providers[0].load_balancer.as_ref().unwrap();
        assert_eq!(lb.target_load_percent, 75.0);
        assert!(lb.always_use_for_whitelisted_clients);
        assert_eq!(dist.provider("amazon-1").map(|p| p.id.as_str()), Some("amazon-1"));
    }

    #[test]
    fn selection_mode_defaults_to_failover() {
        let dist: Distribution = serde_json::from_str(r#"{"id":"d"}"#).unwrap();
        assert_eq!(dist.selection_mode, SelectionMode::Failover);
        assert!(dist.providers.is_empty());
    }
}
