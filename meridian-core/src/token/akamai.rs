//! Akamai edge authorization tokens.
//!
//! Wire format: `~` delimited `name=value` fields, conventionally
//! `ip=..~exp=..~acl=..~<custom>..~hmac=..`. The `hmac` field comes last and is not
//! part of the signing input. The key is the hex-decoded secret.

use tracing::{debug, warn};
use url::Url;

use super::hash::HashFn;
use super::{
    hash_name_or_default, same_directory_acl, unix_now, MintedToken, NormalizedToken,
    DEFAULT_TOKEN_LIFETIME_SECS,
};
use crate::domain::distribution::TokenConfig;
use crate::domain::request::RequestContext;
use crate::error::TokenError;

/// Query parameter (and cookie) used when the configuration does not name one.
pub const DEFAULT_AUTH_PARAM: &str = "__token__";

const DELIMITER: char = '~';
const HMAC_FIELD: &str = "hmac";
const RESERVED_FIELDS: [&str; 4] = ["ip", "exp", "acl", HMAC_FIELD];

/// Read and validate an Akamai token from the query parameter, falling back to a
/// cookie of the same name.
pub fn extract(request: &RequestContext, config: Option<&TokenConfig>) -> NormalizedToken {
    let param = config
        .and_then(|c| c.auth_param.as_deref())
        .unwrap_or(DEFAULT_AUTH_PARAM);

    let (mut token, raw) = if let Some(raw) = request.query_param(param) {
        (NormalizedToken::present(vec![param.to_string()]), raw)
    } else if let Some(raw) = request.cookie(param) {
        let mut token = NormalizedToken::present(Vec::new());
        token.cookie = Some(raw.to_string());
        (token, raw.to_string())
    } else {
        return NormalizedToken::absent();
    };

    let Some((signed, signature)) = split_signature(&raw) else {
        debug!("akamai token has no trailing hmac field");
        return token;
    };
    let Some(fields) = parse_fields(signed) else {
        debug!("akamai token has a malformed field");
        return token;
    };
    let Some(config) = config else {
        warn!("akamai token presented but no secrets configured");
        return token;
    };
    let hash_name = hash_name_or_default(Some(config));
    let Some(hash) = HashFn::from_name(hash_name) else {
        warn!(hash = hash_name, "akamai token configuration names an unsupported hash");
        return token;
    };
    let Ok(signature) = hex::decode(signature) else {
        debug!("akamai token hmac is not hex");
        return token;
    };

    let input = signing_input(signed, config.hash_salt.as_deref());
    let verified = config.secrets.iter().any(|secret| match hex::decode(secret) {
        Ok(key) => hash.verify(&key, input.as_bytes(), &signature),
        Err(_) => {
            warn!("akamai secret is not hex encoded, skipping");
            false
        }
    });
    if !verified {
        debug!("akamai token signature mismatch");
        return token;
    }

    let end_time = match field(&fields, "exp").map(str::parse::<i64>) {
        Some(Ok(end_time)) => end_time,
        None => 0,
        Some(Err(_)) => {
            debug!("akamai token has a malformed expiry");
            return token;
        }
    };

    token.is_valid = true;
    token.end_time = end_time;
    token.ip_address = field(&fields, "ip").map(str::to_string);
    token.acl = field(&fields, "acl")
        .map(str::to_string)
        .unwrap_or_else(|| same_directory_acl(request.url.path()));
    for (name, value) in fields.iter().filter(|(name, _)| !RESERVED_FIELDS.contains(name)) {
        token.payload.insert(name.to_string(), value.to_string());
    }
    token
}

/// Mint an Akamai token for `target`, signed with the first configured secret.
///
/// Fields are written as `ip?, exp, acl, <payload>..., hmac`. A missing ACL becomes
/// the same-directory wildcard of the target path and a missing expiry one day from
/// now.
pub fn mint(
    target: &Url,
    token: &NormalizedToken,
    config: Option<&TokenConfig>,
) -> Result<MintedToken, TokenError> {
    let config = config.ok_or(TokenError::NotConfigured("akamai"))?;
    let secret = config.secrets.first().ok_or(TokenError::NoSecret)?;
    let key = hex::decode(secret).map_err(|e| TokenError::InvalidKey(e.to_string()))?;
    let hash_name = hash_name_or_default(Some(config));
    let hash =
        HashFn::from_name(hash_name).ok_or_else(|| TokenError::UnknownHash(hash_name.to_string()))?;

    let end_time = if token.end_time == 0 {
        unix_now() + DEFAULT_TOKEN_LIFETIME_SECS
    } else {
        token.end_time
    };
    let acl = if token.acl.is_empty() {
        same_directory_acl(target.path())
    } else {
        token.acl.clone()
    };

    let mut fields = Vec::with_capacity(3 + token.payload.len());
    if let Some(ip) = &token.ip_address {
        fields.push(format!("ip={ip}"));
    }
    fields.push(format!("exp={end_time}"));
    fields.push(format!("acl={acl}"));
    for (name, value) in &token.payload {
        if RESERVED_FIELDS.contains(&name.as_str()) {
            continue;
        }
        if name.contains(DELIMITER) || value.contains(DELIMITER) {
            debug!(field = %name, "dropping payload field containing the token delimiter");
            continue;
        }
        fields.push(format!("{name}={value}"));
    }
    let signed = fields.join("~");

    let input = signing_input(&signed, config.hash_salt.as_deref());
    let signature = hex::encode(hash.sign(&key, input.as_bytes())?);

    let param = config.auth_param.as_deref().unwrap_or(DEFAULT_AUTH_PARAM);
    Ok(MintedToken::single(param, format!("{signed}~{HMAC_FIELD}={signature}")))
}

/// The bytes an Akamai HMAC covers: the signed fields followed by the delimiter,
/// then either `salt=<salt>` or, without a salt, nothing (the trailing delimiter is
/// stripped again).
fn signing_input(signed: &str, salt: Option<&str>) -> String {
    let mut input = format!("{signed}{DELIMITER}");
    match salt {
        Some(salt) => {
            input.push_str("salt=");
            input.push_str(salt);
        }
        None => {
            input.pop();
        }
    }
    input
}

/// Split `<fields>~hmac=<hex>` into the signed part and the signature.
fn split_signature(raw: &str) -> Option<(&str, &str)> {
    let (signed, last) = raw.rsplit_once(DELIMITER)?;
    let signature = last.strip_prefix("hmac=")?;
    if signed.is_empty() {
        return None;
    }
    Some((signed, signature))
}

fn parse_fields(signed: &str) -> Option<Vec<(&str, &str)>> {
    signed.split(DELIMITER).map(|f| f.split_once('=')).collect()
}

fn field<'a>(fields: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}
