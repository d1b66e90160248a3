//! CloudFront signed URLs with a canned-style policy.
//!
//! The policy JSON is carried base64 encoded in `Policy`, its RSA-SHA1
//! (PKCS#1 v1.5) signature in `Signature` and the key pair id in `Key-Pair-Id`.
//! Both base64 values use CloudFront's URL-safe substitution (`+`→`-`, `=`→`_`,
//! `/`→`~`).

use std::sync::{Arc, LazyLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::{debug, warn};
use url::Url;

use super::{unix_now, MintedToken, NormalizedToken, DEFAULT_TOKEN_LIFETIME_SECS};
use crate::domain::distribution::SignedUrlConfig;
use crate::domain::request::{replace_query_params, strip_query_params, RequestContext};
use crate::error::TokenError;

/// Query parameter carrying the key pair id.
pub const KEY_PAIR_ID_PARAM: &str = "Key-Pair-Id";
/// Query parameter carrying the encoded policy.
pub const POLICY_PARAM: &str = "Policy";
/// Query parameter carrying the encoded signature.
pub const SIGNATURE_PARAM: &str = "Signature";
/// Canned-policy expiry parameter; never minted but stripped when present.
pub const EXPIRES_PARAM: &str = "Expires";

#[derive(Debug, Serialize, Deserialize)]
struct Policy {
    #[serde(rename = "Statement")]
    statement: Vec<Statement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Statement {
    #[serde(rename = "Resource")]
    resource: String,
    #[serde(rename = "Condition")]
    condition: Condition,
}

#[derive(Debug, Serialize, Deserialize)]
struct Condition {
    #[serde(rename = "DateLessThan")]
    date_less_than: EpochTime,
    #[serde(rename = "IpAddress", default, skip_serializing_if = "Option::is_none")]
    ip_address: Option<SourceIp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EpochTime {
    #[serde(rename = "AWS:EpochTime")]
    epoch_time: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SourceIp {
    #[serde(rename = "AWS:SourceIp")]
    source_ip: String,
}

/// Base64 with CloudFront's character substitution.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    STANDARD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '=' => '_',
            '/' => '~',
            other => other,
        })
        .collect()
}

/// Inverse of [`encode_url_safe`].
pub fn decode_url_safe(encoded: &str) -> Option<Vec<u8>> {
    let standard: String = encoded
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '=',
            '~' => '/',
            other => other,
        })
        .collect();
    STANDARD.decode(standard).ok()
}

/// Parse a PEM encoded RSA private key, PKCS#1 or PKCS#8.
pub fn load_private_key(pem: &str) -> Result<RsaPrivateKey, TokenError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| TokenError::InvalidKey(e.to_string()))
}

/// Signing and verifying halves of a parsed CloudFront key.
struct KeyPair {
    signing: SigningKey<Sha1>,
    verifying: VerifyingKey<Sha1>,
}

/// Parsed keys by PEM text, shared by every distribution using the same key.
static PARSED_KEYS: LazyLock<DashMap<String, Arc<KeyPair>>> = LazyLock::new(DashMap::new);

fn key_pair(pem: &str) -> Result<Arc<KeyPair>, TokenError> {
    if let Some(cached) = PARSED_KEYS.get(pem) {
        return Ok(Arc::clone(cached.value()));
    }
    let key = load_private_key(pem)?;
    let parsed = Arc::new(KeyPair {
        verifying: VerifyingKey::<Sha1>::new(key.to_public_key()),
        signing: SigningKey::<Sha1>::new(key),
    });
    debug!("parsed cloudfront private key");
    Ok(Arc::clone(
        PARSED_KEYS
            .entry(pem.to_string())
            .or_insert(parsed)
            .value(),
    ))
}

/// Read and verify a CloudFront signed URL from the request query.
pub fn extract(request: &RequestContext, config: Option<&SignedUrlConfig>) -> NormalizedToken {
    let policy = request.query_param(POLICY_PARAM);
    let signature = request.query_param(SIGNATURE_PARAM);
    let key_pair_id = request.query_param(KEY_PAIR_ID_PARAM);
    if policy.is_none() && signature.is_none() && key_pair_id.is_none() {
        return NormalizedToken::absent();
    }

    let mut token = NormalizedToken::present(
        [KEY_PAIR_ID_PARAM, POLICY_PARAM, SIGNATURE_PARAM, EXPIRES_PARAM]
            .iter()
            .map(|p| p.to_string())
            .collect(),
    );

    let (Some(policy), Some(signature), Some(key_pair_id)) = (policy, signature, key_pair_id) else {
        debug!("cloudfront signed url is missing parameters");
        return token;
    };
    let Some(config) = config else {
        warn!("cloudfront signed url presented but no key configured");
        return token;
    };
    if key_pair_id != config.key_pair_id {
        debug!(key_pair_id = %key_pair_id, "cloudfront key pair id mismatch");
        return token;
    }
    let (Some(policy), Some(signature)) = (decode_url_safe(&policy), decode_url_safe(&signature))
    else {
        debug!("cloudfront policy or signature is not decodable");
        return token;
    };
    let keys = match key_pair(&config.private_key) {
        Ok(keys) => keys,
        Err(error) => {
            warn!(%error, "cloudfront private key unusable");
            return token;
        }
    };

    let verified = Signature::try_from(signature.as_slice())
        .map(|signature| keys.verifying.verify(&policy, &signature).is_ok())
        .unwrap_or(false);
    if !verified {
        debug!("cloudfront signature mismatch");
        return token;
    }

    let Some(statement) = serde_json::from_slice::<Policy>(&policy)
        .ok()
        .and_then(|p| p.statement.into_iter().next())
    else {
        debug!("cloudfront policy has no statement");
        return token;
    };

    token.is_valid = true;
    token.end_time = statement.condition.date_less_than.epoch_time;
    token.acl = statement.resource;
    token.ip_address = statement
        .condition
        .ip_address
        .map(|ip| strip_host_prefix(&ip.source_ip));
    token
}

/// Sign `target` for CloudFront.
///
/// Payload fields are first copied onto the target query string; the policy
/// resource is the resulting full URL, so the redirect URL minus the three
/// signing parameters matches it exactly. The source IP condition is only
/// present when the token carried an address.
pub fn mint(
    target: &Url,
    token: &NormalizedToken,
    config: Option<&SignedUrlConfig>,
) -> Result<MintedToken, TokenError> {
    let config = config.ok_or(TokenError::NotConfigured("cloudfront"))?;
    let keys = key_pair(&config.private_key)?;

    let payload: Vec<(String, String)> = token
        .payload
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut resource = target.clone();
    strip_query_params(
        &mut resource,
        &[KEY_PAIR_ID_PARAM, POLICY_PARAM, SIGNATURE_PARAM].map(String::from),
    );
    replace_query_params(&mut resource, &payload);

    let end_time = if token.end_time == 0 {
        unix_now() + DEFAULT_TOKEN_LIFETIME_SECS
    } else {
        token.end_time
    };
    let policy = Policy {
        statement: vec![Statement {
            resource: resource.to_string(),
            condition: Condition {
                date_less_than: EpochTime { epoch_time: end_time },
                ip_address: token.ip_address.as_deref().map(|ip| SourceIp {
                    source_ip: with_host_prefix(ip),
                }),
            },
        }],
    };
    let policy = serde_json::to_string(&policy)?;
    let signature = keys.signing.sign(policy.as_bytes()).to_bytes();

    let mut params = payload;
    params.push((KEY_PAIR_ID_PARAM.to_string(), config.key_pair_id.clone()));
    params.push((POLICY_PARAM.to_string(), encode_url_safe(policy.as_bytes())));
    params.push((SIGNATURE_PARAM.to_string(), encode_url_safe(&signature)));
    Ok(MintedToken { params })
}

fn with_host_prefix(ip: &str) -> String {
    if ip.contains('/') {
        ip.to_string()
    } else if ip.contains(':') {
        format!("{ip}/128")
    } else {
        format!("{ip}/32")
    }
}

fn strip_host_prefix(ip: &str) -> String {
    ip.strip_suffix("/32")
        .or_else(|| ip.strip_suffix("/128"))
        .unwrap_or(ip)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/cloudfront-test-key.pem"
    ));

    fn config() -> SignedUrlConfig {
        SignedUrlConfig {
            key_pair_id: "APKAEXAMPLE".into(),
            private_key: TEST_KEY.into(),
        }
    }

    fn request(url: &Url) -> RequestContext {
        RequestContext::new(url.clone(), "203.0.113.5:999".parse().unwrap(), "203.0.113.1:80".parse().unwrap())
    }

    fn signed_target(token: &NormalizedToken) -> Url {
        let mut target = Url::parse("https://d111.cloudfront.net/video/a.mp4?quality=hd").unwrap();
        mint(&target, token, Some(&config())).unwrap().apply_to(&mut target);
        target
    }

    #[test]
    fn substitution_roundtrips() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_url_safe(&bytes);
        assert!(!encoded.contains(['+', '=', '/']));
        assert_eq!(decode_url_safe(&encoded).unwrap(), bytes);
    }

    #[test]
    fn minted_url_verifies_with_public_key() {
        let mut token = NormalizedToken::present(Vec::new());
        token.end_time = 2_000_000_000;
        token.ip_address = Some("203.0.113.5".into());
        token.payload.insert("session".into(), "42".into());
        let target = signed_target(&token);

        let query = |name: &str| {
            target
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        assert_eq!(query(KEY_PAIR_ID_PARAM), "APKAEXAMPLE");
        assert_eq!(query("session"), "42");

        let policy = decode_url_safe(&query(POLICY_PARAM)).unwrap();
        let policy_json: serde_json::Value = serde_json::from_slice(&policy).unwrap();
        let statement = &policy_json["Statement"][0];
        assert_eq!(
            statement["Resource"],
            "https://d111.cloudfront.net/video/a.mp4?quality=hd&session=42"
        );
        assert_eq!(statement["Condition"]["DateLessThan"]["AWS:EpochTime"], 2_000_000_000);
        assert_eq!(statement["Condition"]["IpAddress"]["AWS:SourceIp"], "203.0.113.5/32");

        let public = load_private_key(TEST_KEY).unwrap().to_public_key();
        let signature = decode_url_safe(&query(SIGNATURE_PARAM)).unwrap();
        VerifyingKey::<Sha1>::new(public)
            .verify(&policy, &Signature::try_from(signature.as_slice()).unwrap())
            .unwrap();
    }

    #[test]
    fn policy_without_ip_has_no_ip_condition() {
        let token = NormalizedToken::present(Vec::new());
        let target = signed_target(&token);
        let policy = target
            .query_pairs()
            .find(|(k, _)| k == POLICY_PARAM)
            .and_then(|(_, v)| decode_url_safe(&v))
            .unwrap();
        let policy = String::from_utf8(policy).unwrap();
        assert!(!policy.contains("IpAddress"));
        assert!(policy.starts_with(r#"{"Statement":[{"Resource":"https://d111.cloudfront.net/video/a.mp4?quality=hd","#));
    }

    #[test]
    fn extract_roundtrip() {
        let mut token = NormalizedToken::present(Vec::new());
        token.end_time = 2_000_000_000;
        token.ip_address = Some("203.0.113.5".into());
        let target = signed_target(&token);

        let extracted = extract(&request(&target), Some(&config()));
        assert!(extracted.is_present && extracted.is_valid);
        assert_eq!(extracted.end_time, 2_000_000_000);
        assert_eq!(extracted.ip_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(extracted.acl, "https://d111.cloudfront.net/video/a.mp4?quality=hd");
        assert!(extracted.auth_params.contains(&"Signature".to_string()));
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let target = signed_target(&NormalizedToken::present(Vec::new()));
        let mut pairs: Vec<(String, String)> = target
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        for (name, value) in pairs.iter_mut() {
            if name == SIGNATURE_PARAM {
                let first = value.remove(0);
                value.insert(0, if first == 'A' { 'B' } else { 'A' });
            }
        }
        let mut tampered = target.clone();
        tampered.query_pairs_mut().clear().extend_pairs(pairs);

        let extracted = extract(&request(&tampered), Some(&config()));
        assert!(extracted.is_present && !extracted.is_valid);
    }

    #[test]
    fn foreign_key_pair_is_invalid() {
        let target = signed_target(&NormalizedToken::present(Vec::new()));
        let other = SignedUrlConfig {
            key_pair_id: "APKAOTHER".into(),
            private_key: TEST_KEY.into(),
        };
        assert!(!extract(&request(&target), Some(&other)).is_valid);
    }

    #[test]
    fn partial_parameters_are_invalid() {
        let url = Url::parse("https://d111.cloudfront.net/a?Policy=abc").unwrap();
        let token = extract(&request(&url), Some(&config()));
        assert!(token.is_present && !token.is_valid);
    }

    #[test]
    fn resource_matches_redirect_url_byte_for_byte() {
        let mut target =
            Url::parse("https://d111.cloudfront.net/v/a.mp4?q=a%20b&p=x/y&flag").unwrap();
        let mut token = NormalizedToken::present(Vec::new());
        token.payload.insert("session".into(), "s 1".into());
        mint(&target, &token, Some(&config())).unwrap().apply_to(&mut target);

        let policy = target
            .query_pairs()
            .find(|(k, _)| k == POLICY_PARAM)
            .and_then(|(_, v)| decode_url_safe(&v))
            .unwrap();
        let policy: serde_json::Value = serde_json::from_slice(&policy).unwrap();
        let (unsigned, _) = target.as_str().split_once("&Key-Pair-Id=").unwrap();
        assert_eq!(unsigned, "https://d111.cloudfront.net/v/a.mp4?q=a%20b&p=x/y&flag&session=s+1");
        assert_eq!(policy["Statement"][0]["Resource"], unsigned);
    }

    #[test]
    fn parsed_key_is_reused() {
        let first = key_pair(TEST_KEY).unwrap();
        let second = key_pair(TEST_KEY).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(key_pair("not a key").is_err());
    }
}
