//! HMAC over a named hash function.

use std::fmt;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::error::TokenError;

/// Hash used when a token or configuration does not name one.
pub const DEFAULT_HASH_NAME: &str = "sha256";

/// Hash functions usable for token HMACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFn {
    /// SHA-1.
    Sha1,
    /// SHA-224.
    Sha224,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashFn {
    /// Look up a hash by name, ignoring case and dashes (`SHA-256` == `sha256`).
    pub fn from_name(name: &str) -> Option<Self> {
        let name: String = name
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match name.as_str() {
            "sha1" => Some(HashFn::Sha1),
            "sha224" => Some(HashFn::Sha224),
            "sha256" => Some(HashFn::Sha256),
            "sha384" => Some(HashFn::Sha384),
            "sha512" => Some(HashFn::Sha512),
            _ => None,
        }
    }

    /// Canonical name, as written into Velocix `fn` fields.
    pub fn name(&self) -> &'static str {
        match self {
            HashFn::Sha1 => "sha1",
            HashFn::Sha224 => "sha224",
            HashFn::Sha256 => "sha256",
            HashFn::Sha384 => "sha384",
            HashFn::Sha512 => "sha512",
        }
    }

    /// HMAC of `data` under `key`.
    pub fn sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, TokenError> {
        match self {
            HashFn::Sha1 => sign_with::<Hmac<Sha1>>(key, data),
            HashFn::Sha224 => sign_with::<Hmac<Sha224>>(key, data),
            HashFn::Sha256 => sign_with::<Hmac<Sha256>>(key, data),
            HashFn::Sha384 => sign_with::<Hmac<Sha384>>(key, data),
            HashFn::Sha512 => sign_with::<Hmac<Sha512>>(key, data),
        }
    }

    /// Constant-time check of `signature` against the HMAC of `data` under `key`.
    pub fn verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            HashFn::Sha1 => verify_with::<Hmac<Sha1>>(key, data, signature),
            HashFn::Sha224 => verify_with::<Hmac<Sha224>>(key, data, signature),
            HashFn::Sha256 => verify_with::<Hmac<Sha256>>(key, data, signature),
            HashFn::Sha384 => verify_with::<Hmac<Sha384>>(key, data, signature),
            HashFn::Sha512 => verify_with::<Hmac<Sha512>>(key, data, signature),
        }
    }
}

impl fmt::Display for HashFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn sign_with<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
    Mac::update(&mut mac, data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_with<M: Mac + KeyInit>(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            Mac::update(&mut mac, data);
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_lenient() {
        assert_eq!(HashFn::from_name("SHA-256"), Some(HashFn::Sha256));
        assert_eq!(HashFn::from_name("sha1"), Some(HashFn::Sha1));
        assert_eq!(HashFn::from_name("md5"), None);
    }

    #[test]
    fn known_hmac_sha256_vector() {
        // RFC 4231 test case 2
        let mac = HashFn::Sha256
            .sign(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(
            hex::encode(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert!(HashFn::Sha256.verify(b"Jefe", b"what do ya want for nothing?", &mac));
        assert!(!HashFn::Sha256.verify(b"jefe", b"what do ya want for nothing?", &mac));
    }
}
