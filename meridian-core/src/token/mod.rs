//! Token codecs.
//!
//! Three incompatible token formats are understood: Velocix HMAC tokens, Akamai edge
//! authorization tokens and CloudFront signed URLs. Every codec can read (and
//! validate) an inbound token into a [`NormalizedToken`] and mint a fresh token for
//! its own CDN from one. Extraction never fails: garbled input is reported as a
//! present but invalid token.

pub mod akamai;
pub mod cloudfront;
pub mod hash;
pub mod velocix;

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::distribution::{InboundAuth, Provider, SignedUrlConfig, TokenConfig};
use crate::domain::request::{replace_query_params, RequestContext};
use crate::error::TokenError;

/// Lifetime given to minted tokens that carry no expiry of their own.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 86_400;

/// Codec-independent view of an inbound token.
///
/// Computed once per request and reused for every candidate CDN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedToken {
    /// A token was found in the request.
    pub is_present: bool,
    /// The token's signature verified against a configured secret or key.
    pub is_valid: bool,
    /// Expiry as seconds since the epoch; `0` when unknown.
    pub end_time: i64,
    /// Path pattern the token grants access to.
    pub acl: String,
    /// Client address the token is bound to.
    pub ip_address: Option<String>,
    /// Custom fields carried through to minted tokens.
    pub payload: IndexMap<String, String>,
    /// Query parameters that carried the token and must not be forwarded.
    pub auth_params: Vec<String>,
    /// Raw token when it arrived in a cookie rather than the query.
    pub cookie: Option<String>,
}

impl NormalizedToken {
    /// No token in the request.
    pub fn absent() -> Self {
        Self::default()
    }

    /// A token was found but has not (yet) validated.
    pub fn present(auth_params: Vec<String>) -> Self {
        Self {
            is_present: true,
            auth_params,
            ..Self::default()
        }
    }

    /// Copy with defaults filled in for minting towards `target`: an absolute-URL
    /// ACL is reduced to its path, a missing ACL becomes the same-directory wildcard
    /// of the target path and a missing expiry becomes one day from `now`.
    pub fn normalized_for(&self, target: &Url, now: i64) -> NormalizedToken {
        let mut token = self.clone();
        if let Ok(absolute) = Url::parse(&token.acl) {
            if absolute.has_host() {
                token.acl = absolute.path().to_string();
            }
        }
        if token.acl.is_empty() {
            token.acl = same_directory_acl(target.path());
        }
        if token.end_time == 0 {
            token.end_time = now + DEFAULT_TOKEN_LIFETIME_SECS;
        }
        token
    }
}

/// Query parameters produced by a codec's `mint`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MintedToken {
    /// Parameters to set on the target URL, in order.
    pub params: Vec<(String, String)>,
}

impl MintedToken {
    /// A token carried in a single query parameter.
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            params: vec![(name.into(), value.into())],
        }
    }

    /// Set the parameters on `url`, replacing any with the same name.
    pub fn apply_to(&self, url: &mut Url) {
        replace_query_params(url, &self.params);
    }
}

/// Configuration a codec reads its secrets or keys from.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecSettings<'a> {
    /// Shared-secret parameters.
    pub token: Option<&'a TokenConfig>,
    /// Signed URL parameters.
    pub signed_url: Option<&'a SignedUrlConfig>,
}

impl<'a> CodecSettings<'a> {
    /// Settings of a distribution provider entry.
    pub fn from_provider(provider: &'a Provider) -> Self {
        Self {
            token: provider.token_config.as_ref(),
            signed_url: provider.signed_url_config.as_ref(),
        }
    }

    /// Settings of a distribution's inbound auth block.
    pub fn from_auth(auth: &'a InboundAuth) -> Self {
        Self {
            token: auth.token_config.as_ref(),
            signed_url: auth.signed_url_config.as_ref(),
        }
    }
}

/// The supported token formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScheme {
    /// Base64 `fields,hmac` tokens.
    Velocix,
    /// `~` delimited edge authorization tokens.
    Akamai,
    /// RSA-SHA1 signed canned policies.
    #[serde(alias = "amazon")]
    CloudFront,
}

impl TokenScheme {
    /// Read the token this scheme understands from `request`.
    pub fn extract(self, request: &RequestContext, settings: CodecSettings<'_>) -> NormalizedToken {
        match self {
            TokenScheme::Velocix => velocix::extract(request, settings.token),
            TokenScheme::Akamai => akamai::extract(request, settings.token),
            TokenScheme::CloudFront => cloudfront::extract(request, settings.signed_url),
        }
    }

    /// Mint a token granting `token`'s rights on `target`.
    pub fn mint(
        self,
        target: &Url,
        token: &NormalizedToken,
        settings: CodecSettings<'_>,
        client_ip: IpAddr,
    ) -> Result<MintedToken, TokenError> {
        match self {
            TokenScheme::Velocix => velocix::mint(token, settings.token, client_ip),
            TokenScheme::Akamai => akamai::mint(target, token, settings.token),
            TokenScheme::CloudFront => cloudfront::mint(target, token, settings.signed_url),
        }
    }

    /// Whether `settings` hold what this scheme needs to mint.
    pub fn can_mint(self, settings: CodecSettings<'_>) -> bool {
        match self {
            TokenScheme::Velocix | TokenScheme::Akamai => {
                settings.token.is_some_and(|t| !t.secrets.is_empty())
            }
            TokenScheme::CloudFront => settings.signed_url.is_some(),
        }
    }

    /// Whether every URL handed out for this scheme must be signed, token or not.
    pub fn signs_every_url(self) -> bool {
        matches!(self, TokenScheme::CloudFront)
    }

    /// Query parameter the token travels in for `settings`.
    pub fn auth_param(self, settings: CodecSettings<'_>) -> String {
        let configured = settings.token.and_then(|t| t.auth_param.clone());
        match self {
            TokenScheme::Velocix => {
                configured.unwrap_or_else(|| velocix::DEFAULT_AUTH_PARAM.to_string())
            }
            TokenScheme::Akamai => configured.unwrap_or_else(|| akamai::DEFAULT_AUTH_PARAM.to_string()),
            TokenScheme::CloudFront => cloudfront::POLICY_PARAM.to_string(),
        }
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenScheme::Velocix => "velocix",
            TokenScheme::Akamai => "akamai",
            TokenScheme::CloudFront => "cloudfront",
        }
    }
}

/// Extract the request's token once, trying each `(scheme, settings)` source in
/// order. The first present and valid reading wins; failing that the first present
/// reading (invalid) is returned; otherwise the token is absent.
pub fn extract_inbound<'a, I>(request: &RequestContext, sources: I) -> NormalizedToken
where
    I: IntoIterator<Item = (TokenScheme, CodecSettings<'a>)>,
{
    let mut first_present: Option<NormalizedToken> = None;
    for (scheme, settings) in sources {
        let token = scheme.extract(request, settings);
        if token.is_present && token.is_valid {
            return token;
        }
        if token.is_present && first_present.is_none() {
            first_present = Some(token);
        }
    }
    first_present.unwrap_or_else(NormalizedToken::absent)
}

/// Same-directory wildcard of a path: `/a/b/c.mp4` becomes `/a/b/*`.
pub fn same_directory_acl(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => format!("{}*", &path[..=idx]),
        None => "/*".to_string(),
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub(crate) fn hash_name_or_default(config: Option<&TokenConfig>) -> &str {
    config
        .and_then(|c| c.hash_fn.as_deref())
        .unwrap_or(hash::DEFAULT_HASH_NAME)
}
