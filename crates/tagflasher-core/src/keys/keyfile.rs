//! Static keyfiles
//!
//! A keyfile is a one-byte key count followed by that many 28-byte public
//! keys. Static-mode firmware receives everything after the count byte.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p224::SecretKey;
use rand::rngs::OsRng;

use super::export::CatalogKey;
use super::schedule::{hashed_advertisement_key, public_x_for_secret, HASHED_KEY_LEN, KEY_LEN};
use crate::error::KeyError;

/// Maximum number of keys a keyfile header can describe
pub const MAX_KEYFILE_KEYS: usize = u8::MAX as usize;

/// A randomly generated key pair for static mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticKey {
    /// P-224 private scalar
    pub private_key: [u8; KEY_LEN],
    /// Public X coordinate
    pub public_key: [u8; KEY_LEN],
    /// SHA-256 of the public key
    pub hashed_adv_key: [u8; HASHED_KEY_LEN],
}

impl StaticKey {
    /// Generate a key whose base64 hashed key contains no `/`.
    ///
    /// Report-fetching tools use the base64 hash in file paths, so keys
    /// that would produce a `/` are drawn again.
    pub fn generate() -> Self {
        loop {
            let secret = SecretKey::random(&mut OsRng);
            let Some(public_key) = public_x_for_secret(&secret) else {
                continue;
            };
            let hashed_adv_key = hashed_advertisement_key(&public_key);
            if STANDARD.encode(hashed_adv_key).contains('/') {
                log::trace!("Discarding key with '/' in hashed key");
                continue;
            }
            let mut private_key = [0u8; KEY_LEN];
            private_key.copy_from_slice(&secret.to_bytes());
            return Self {
                private_key,
                public_key,
                hashed_adv_key,
            };
        }
    }
}

impl CatalogKey for StaticKey {
    fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn hashed_adv_key(&self) -> &[u8] {
        &self.hashed_adv_key
    }
}

/// Generate `count` static keys
pub fn generate_static_keys(count: usize) -> Result<Vec<StaticKey>, KeyError> {
    if count > MAX_KEYFILE_KEYS {
        return Err(KeyError::TooManyKeys(count));
    }
    Ok((0..count).map(|_| StaticKey::generate()).collect())
}

/// Parsed keyfile contents
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyfile {
    public_keys: Vec<[u8; KEY_LEN]>,
}

impl Keyfile {
    /// Build a keyfile from public keys
    pub fn new(public_keys: Vec<[u8; KEY_LEN]>) -> Result<Self, KeyError> {
        if public_keys.len() > MAX_KEYFILE_KEYS {
            return Err(KeyError::TooManyKeys(public_keys.len()));
        }
        Ok(Self { public_keys })
    }

    /// Build a keyfile holding the public halves of static keys
    pub fn from_static_keys(keys: &[StaticKey]) -> Result<Self, KeyError> {
        Self::new(keys.iter().map(|k| k.public_key).collect())
    }

    /// Parse keyfile bytes.
    ///
    /// Bytes beyond the declared key count are ignored.
    pub fn parse(data: &[u8]) -> Result<Self, KeyError> {
        let (&count, body) = data.split_first().ok_or(KeyError::KeyfileEmpty)?;
        let expected = usize::from(count) * KEY_LEN;
        if body.len() < expected {
            return Err(KeyError::KeyfileTruncated {
                expected,
                actual: body.len(),
            });
        }
        if body.len() > expected {
            log::warn!(
                "Keyfile has {} trailing bytes after {} keys",
                body.len() - expected,
                count
            );
        }

        let public_keys = body[..expected]
            .chunks_exact(KEY_LEN)
            .map(|chunk| {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(chunk);
                key
            })
            .collect();
        Ok(Self { public_keys })
    }

    /// Encode as count byte plus keys
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.public_keys.len() * KEY_LEN);
        // new() and parse() bound the count to one byte
        out.push(self.public_keys.len() as u8);
        out.extend_from_slice(&self.key_payload());
        out
    }

    /// The concatenated public keys, without the count byte
    pub fn key_payload(&self) -> Vec<u8> {
        self.public_keys.concat()
    }

    /// Public keys in file order
    pub fn public_keys(&self) -> &[[u8; KEY_LEN]] {
        &self.public_keys
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.public_keys.len()
    }

    /// Whether the keyfile holds no keys
    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }
}
