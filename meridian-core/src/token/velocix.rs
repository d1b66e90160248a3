//! Velocix HMAC tokens.
//!
//! Wire format: `base64("<fields>,<hex hmac>")` where `<fields>` is an `&` joined
//! list of `name=value` pairs: `pathURI`, `fn` (hash name), `expiry`, optional
//! `c-ip` and any number of `x:<name>` custom fields. The HMAC covers `<fields>`
//! exactly as transmitted.

use std::net::IpAddr;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tracing::{debug, warn};

use super::hash::HashFn;
use super::{hash_name_or_default, same_directory_acl, MintedToken, NormalizedToken};
use crate::domain::distribution::TokenConfig;
use crate::domain::request::RequestContext;
use crate::error::TokenError;

/// Query parameter used when the configuration does not name one.
pub const DEFAULT_AUTH_PARAM: &str = "authToken";
/// Cookie consulted when the query parameter is absent.
pub const COOKIE_NAME: &str = "vxtoken";
/// Custom field carrying the address of the client the token was minted for.
pub const CLIENT_IP_FIELD: &str = "clientIP";

const CUSTOM_PREFIX: &str = "x:";

struct Decoded {
    fields: String,
    signature: Vec<u8>,
}

/// Read and validate a Velocix token from the query parameter, falling back to the
/// `vxtoken` cookie.
pub fn extract(request: &RequestContext, config: Option<&TokenConfig>) -> NormalizedToken {
    let param = config
        .and_then(|c| c.auth_param.as_deref())
        .unwrap_or(DEFAULT_AUTH_PARAM);

    let (mut token, raw) = if let Some(raw) = request.query_param(param) {
        (NormalizedToken::present(vec![param.to_string()]), raw)
    } else if let Some(raw) = request.cookie(COOKIE_NAME) {
        let mut token = NormalizedToken::present(Vec::new());
        token.cookie = Some(raw.to_string());
        (token, raw.to_string())
    } else {
        return NormalizedToken::absent();
    };

    let Some(decoded) = decode(&raw) else {
        debug!("velocix token is not decodable");
        return token;
    };
    let Some(config) = config else {
        warn!("velocix token presented but no secrets configured");
        return token;
    };

    let fields = parse_fields(&decoded.fields);
    let hash_name = field(&fields, "fn").unwrap_or(super::hash::DEFAULT_HASH_NAME);
    let Some(hash) = HashFn::from_name(hash_name) else {
        warn!(hash = hash_name, "velocix token names an unsupported hash");
        return token;
    };

    let verified = config.secrets.iter().any(|secret| {
        hash.verify(secret.as_bytes(), decoded.fields.as_bytes(), &decoded.signature)
    });
    if !verified {
        debug!("velocix token signature mismatch");
        return token;
    }

    let end_time = match field(&fields, "expiry").map(str::parse::<i64>) {
        Some(Ok(end_time)) => end_time,
        None => 0,
        Some(Err(_)) => {
            debug!("velocix token has a malformed expiry");
            return token;
        }
    };

    token.is_valid = true;
    token.end_time = end_time;
    token.acl = field(&fields, "pathURI")
        .map(str::to_string)
        .unwrap_or_else(|| same_directory_acl(request.url.path()));
    token.ip_address = field(&fields, "c-ip").map(str::to_string);
    for (name, value) in &fields {
        if let Some(custom) = name.strip_prefix(CUSTOM_PREFIX) {
            token.payload.insert(custom.to_string(), value.to_string());
        }
    }
    token
}

/// Mint a Velocix token for `token`, stamping `client_ip` as `x:clientIP` and
/// signing with the first configured secret.
pub fn mint(
    token: &NormalizedToken,
    config: Option<&TokenConfig>,
    client_ip: IpAddr,
) -> Result<MintedToken, TokenError> {
    let config = config.ok_or(TokenError::NotConfigured("velocix"))?;
    let secret = config.secrets.first().ok_or(TokenError::NoSecret)?;
    let hash_name = hash_name_or_default(Some(config));
    let hash =
        HashFn::from_name(hash_name).ok_or_else(|| TokenError::UnknownHash(hash_name.to_string()))?;

    let mut fields = vec![
        format!("pathURI={}", token.acl),
        format!("fn={}", hash.name()),
        format!("expiry={}", token.end_time),
    ];
    if let Some(ip) = &token.ip_address {
        fields.push(format!("c-ip={ip}"));
    }
    for (name, value) in token.payload.iter().filter(|(name, _)| *name != CLIENT_IP_FIELD) {
        fields.push(format!("{CUSTOM_PREFIX}{name}={value}"));
    }
    fields.push(format!("{CUSTOM_PREFIX}{CLIENT_IP_FIELD}={client_ip}"));
    let fields = fields.join("&");

    let signature = hex::encode(hash.sign(secret.as_bytes(), fields.as_bytes())?);
    let wire = STANDARD.encode(format!("{fields},{signature}"));

    let param = config.auth_param.as_deref().unwrap_or(DEFAULT_AUTH_PARAM);
    Ok(MintedToken::single(param, wire))
}

fn decode(raw: &str) -> Option<Decoded> {
    // a raw `+` in an unencoded query string arrives as a space
    let raw = raw.trim().replace(' ', "+");
    let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(raw.as_bytes()).ok())?;
    let text = String::from_utf8(bytes).ok()?;
    let (fields, signature) = text.rsplit_once(',')?;
    let signature = hex::decode(signature.trim()).ok()?;
    Some(Decoded {
        fields: fields.to_string(),
        signature,
    })
}

fn parse_fields(fields: &str) -> Vec<(&str, &str)> {
    fields
        .split('&')
        .filter(|f| !f.is_empty())
        .map(|f| f.split_once('=').unwrap_or((f, "")))
        .collect()
}

fn field<'a>(fields: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn config(secrets: &[&str]) -> TokenConfig {
        TokenConfig {
            auth_param: Some("authToken".into()),
            secrets: secrets.iter().map(|s| s.to_string()).collect(),
            hash_fn: None,
            hash_salt: None,
        }
    }

    fn request(url: &str) -> RequestContext {
        RequestContext::new(
            Url::parse(url).unwrap(),
            "192.0.2.10:5000".parse().unwrap(),
            "192.0.2.1:80".parse().unwrap(),
        )
    }

    fn sign(fields: &str, secret: &str) -> String {
        let mac = HashFn::Sha256.sign(secret.as_bytes(), fields.as_bytes()).unwrap();
        STANDARD.encode(format!("{fields},{}", hex::encode(mac)))
    }

    fn with_token(token: &str) -> RequestContext {
        let mut url = Url::parse("http://cdn.example.com/video/seg1.ts").unwrap();
        url.query_pairs_mut().append_pair("authToken", token);
        request(url.as_str())
    }

    #[test]
    fn absent_token() {
        let token = extract(&request("http://cdn.example.com/a"), Some(&config(&["k"])));
        assert!(!token.is_present);
    }

    #[test]
    fn validates_against_any_secret() {
        let raw = sign("pathURI=/video/*&fn=sha256&expiry=2000000000&c-ip=192.0.2.10&x:session=42", "second");
        let token = extract(&with_token(&raw), Some(&config(&["first", "second"])));

        assert!(token.is_present && token.is_valid);
        assert_eq!(token.acl, "/video/*");
        assert_eq!(token.end_time, 2_000_000_000);
        assert_eq!(token.ip_address.as_deref(), Some("192.0.2.10"));
        assert_eq!(token.payload.get("session").map(String::as_str), Some("42"));
        assert_eq!(token.auth_params, vec!["authToken".to_string()]);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let raw = sign("pathURI=/video/*&fn=sha256&expiry=2000000000", "other");
        let token = extract(&with_token(&raw), Some(&config(&["k"])));
        assert!(token.is_present);
        assert!(!token.is_valid);
    }

    #[test]
    fn garbage_is_present_but_invalid() {
        let token = extract(&with_token("%%%not-base64"), Some(&config(&["k"])));
        assert!(token.is_present && !token.is_valid);
    }

    #[test]
    fn unknown_hash_is_invalid() {
        let fields = "pathURI=/video/*&fn=md5&expiry=2000000000";
        let mac = HashFn::Sha256.sign(b"k", fields.as_bytes()).unwrap();
        let raw = STANDARD.encode(format!("{fields},{}", hex::encode(mac)));
        let token = extract(&with_token(&raw), Some(&config(&["k"])));
        assert!(token.is_present && !token.is_valid);
    }

    #[test]
    fn cookie_token_is_used_when_query_is_absent() {
        let raw = sign("pathURI=/video/*&fn=sha256&expiry=2000000000", "k");
        let req = request("http://cdn.example.com/video/seg1.ts")
            .with_cookie_header(&format!("vxtoken={raw}"));
        let token = extract(&req, Some(&config(&["k"])));
        assert!(token.is_valid);
        assert!(token.auth_params.is_empty());
        assert_eq!(token.cookie.as_deref(), Some(raw.as_str()));
    }

    #[test]
    fn minted_token_validates_and_carries_client_ip() {
        let mut source = NormalizedToken::present(Vec::new());
        source.is_valid = true;
        source.acl = "/video/*".into();
        source.end_time = 2_000_000_000;
        source.payload.insert("session".into(), "42".into());

        let minted = mint(&source, Some(&config(&["k", "old"])), "192.0.2.10".parse().unwrap()).unwrap();
        let (name, value) = &minted.params[0];
        assert_eq!(name, "authToken");

        let token = extract(&with_token(value), Some(&config(&["k"])));
        assert!(token.is_valid);
        assert_eq!(token.acl, "/video/*");
        assert_eq!(token.end_time, 2_000_000_000);
        assert_eq!(token.payload.get("clientIP").map(String::as_str), Some("192.0.2.10"));
        assert_eq!(token.payload.get("session").map(String::as_str), Some("42"));
    }

    #[test]
    fn mutated_signature_is_rejected() {
        let raw = STANDARD.decode(sign("pathURI=/v/*&fn=sha256&expiry=5", "k")).unwrap();
        let mut text = String::from_utf8(raw).unwrap();
        let last = text.pop().unwrap();
        text.push(if last == '0' { '1' } else { '0' });
        let token = extract(&with_token(&STANDARD.encode(text)), Some(&config(&["k"])));
        assert!(token.is_present && !token.is_valid);
    }

    #[test]
    fn mint_requires_secrets() {
        let source = NormalizedToken::present(Vec::new());
        assert!(matches!(
            mint(&source, Some(&config(&[])), "192.0.2.10".parse().unwrap()),
            Err(TokenError::NoSecret)
        ));
        assert!(matches!(
            mint(&source, None, "192.0.2.10".parse().unwrap()),
            Err(TokenError::NotConfigured(_))
        ));
    }
}
