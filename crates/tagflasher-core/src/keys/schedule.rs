//! Deterministic key rotation schedule
//!
//! For every rotation counter the tag computes
//!
//! ```text
//! digest  = SHA-256(seed || counter as big-endian u32)
//! private = digest[0..28]            (P-224 scalar, big-endian)
//! public  = x(private * G)           (28 bytes, big-endian)
//! ```
//!
//! and advertises `public`. Query tooling looks reports up by
//! `SHA-256(public)`. The host side must reproduce this bit for bit.

use std::fmt;

use p224::elliptic_curve::sec1::ToEncodedPoint;
use p224::SecretKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::KeyError;

/// Seed length in bytes
pub const SEED_LEN: usize = 32;

/// P-224 scalar and coordinate length in bytes
pub const KEY_LEN: usize = 28;

/// Hashed advertisement key length in bytes
pub const HASHED_KEY_LEN: usize = 32;

/// Default key rotation interval in seconds
pub const DEFAULT_ROTATION_SECS: u32 = 900;

/// Per-device root secret
#[derive(Clone, PartialEq, Eq)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Wrap raw seed bytes
    pub fn new(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a seed from a slice that must be exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; SEED_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidSeed(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parse a seed from 64 hex characters
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_slice(&bytes)
    }

    /// Draw a fresh seed from the operating system RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw seed bytes
    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// One rotation interval's key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheduleEntry {
    /// Rotation counter
    pub counter: u32,
    /// P-224 private scalar, big-endian
    pub private_scalar: [u8; KEY_LEN],
    /// X coordinate of the public point, big-endian
    pub public_x: [u8; KEY_LEN],
    /// SHA-256 of `public_x`
    pub hashed_adv_key: [u8; HASHED_KEY_LEN],
}

/// Derive the key pair for one rotation counter.
///
/// Returns `(private_scalar, public_x)`.
pub fn derive(seed: &[u8], counter: u32) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), KeyError> {
    if seed.len() != SEED_LEN {
        return Err(KeyError::InvalidSeed(seed.len()));
    }

    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(counter.to_be_bytes());
    let digest = hasher.finalize();

    let mut private_scalar = [0u8; KEY_LEN];
    private_scalar.copy_from_slice(&digest[..KEY_LEN]);

    let public_x =
        public_x_for_scalar(&private_scalar).ok_or(KeyError::ScalarOutOfRange { counter })?;

    Ok((private_scalar, public_x))
}

/// Compute the public X coordinate for a private scalar.
///
/// Returns `None` if the scalar is zero or not below the group order.
pub(crate) fn public_x_for_scalar(scalar: &[u8; KEY_LEN]) -> Option<[u8; KEY_LEN]> {
    let secret = SecretKey::from_slice(scalar).ok()?;
    public_x_for_secret(&secret)
}

pub(crate) fn public_x_for_secret(secret: &SecretKey) -> Option<[u8; KEY_LEN]> {
    let point = secret.public_key().to_encoded_point(false);
    let x = point.x()?;
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(x);
    Some(out)
}

/// The key that query tooling uses to look up reports
pub fn hashed_advertisement_key(public_x: &[u8]) -> [u8; HASHED_KEY_LEN] {
    Sha256::digest(public_x).into()
}

/// A seed bound to a rotation interval
#[derive(Debug, Clone)]
pub struct KeySchedule {
    seed: Seed,
    rotation_secs: u32,
}

impl KeySchedule {
    /// Create a schedule. A zero interval is treated as one second.
    pub fn new(seed: Seed, rotation_secs: u32) -> Self {
        Self {
            seed,
            rotation_secs: rotation_secs.max(1),
        }
    }

    /// The schedule's seed
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Rotation interval in seconds
    pub fn rotation_secs(&self) -> u32 {
        self.rotation_secs
    }

    /// Number of intervals that fit in `hours`
    pub fn intervals_for_hours(&self, hours: u32) -> usize {
        (u64::from(hours) * 3600 / u64::from(self.rotation_secs)) as usize
    }

    /// First counter of a window starting `offset_hours` after boot.
    ///
    /// Negative offsets clamp to counter 0.
    pub fn counter_for_offset(&self, offset_hours: i64) -> u32 {
        let secs = offset_hours.saturating_mul(3600);
        if secs <= 0 {
            return 0;
        }
        let counter = secs as u64 / u64::from(self.rotation_secs);
        u32::try_from(counter).unwrap_or(u32::MAX)
    }

    /// Key material for a single counter
    pub fn entry(&self, counter: u32) -> Result<KeyScheduleEntry, KeyError> {
        let (private_scalar, public_x) = derive(self.seed.as_bytes(), counter)?;
        Ok(KeyScheduleEntry {
            counter,
            private_scalar,
            public_x,
            hashed_adv_key: hashed_advertisement_key(&public_x),
        })
    }

    /// Up to `count` consecutive entries starting at `start`.
    ///
    /// The counter does not wrap; the sequence ends after `u32::MAX`.
    pub fn entries(&self, start: u32, count: usize) -> Result<Vec<KeyScheduleEntry>, KeyError> {
        let mut out = Vec::with_capacity(count);
        let mut counter = Some(start);
        while out.len() < count {
            let Some(c) = counter else {
                log::warn!("Key schedule exhausted at counter {}", u32::MAX);
                break;
            };
            out.push(self.entry(c)?);
            counter = c.checked_add(1);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_zero_seed_counter_zero_vector() {
        let (private, public) = derive(&[0u8; 32], 0).unwrap();
        assert_eq!(
            private.to_vec(),
            unhex("6db65fd59fd356f6729140571b5bcd6bb3b83492a16e1bf0a3884442")
        );
        assert_eq!(
            public.to_vec(),
            unhex("eda31468b285ca31c25cdbf4ae6bc23abf278f909c1ed085ae5d0a7b")
        );
        assert_eq!(
            hashed_advertisement_key(&public).to_vec(),
            unhex("fbb9b54b0ccd82186a1176f3be4c1e238a256724166b137a78271cfca2d492b7")
        );
    }

    #[test]
    fn test_zero_seed_counter_one_vector() {
        let schedule = KeySchedule::new(Seed::new([0u8; 32]), DEFAULT_ROTATION_SECS);
        let entry = schedule.entry(1).unwrap();
        assert_eq!(
            entry.private_scalar.to_vec(),
            unhex("2158a8906d5e2c2be001bac943ab9cab4063536e1c546b40221fdf8d")
        );
        assert_eq!(
            entry.public_x.to_vec(),
            unhex("1fb4a322e1317bd8c9d02a655db18ddc9103131617e03f35fc59bfd0")
        );
        assert_eq!(
            entry.hashed_adv_key.to_vec(),
            unhex("2bd9e19b0151e8276347e3b59049c27050827b5084483907d800646c28f57d42")
        );
    }

    #[test]
    fn test_sequential_seed_vector() {
        let seed: Vec<u8> = (0u8..32).collect();
        let (private, public) = derive(&seed, 5).unwrap();
        assert_eq!(
            private.to_vec(),
            unhex("0c1c9b0bc4358902b823c7675320d59ded234f308b9dfa5f8d844d19")
        );
        assert_eq!(
            public.to_vec(),
            unhex("7b460dcae7a4ef65bde43cfbd4ebb6afd6a21246ea348ec071cbbe23")
        );
        assert_eq!(
            hashed_advertisement_key(&public).to_vec(),
            unhex("a977516e41cbeb39e0ae7695d7871ada2cbd80d37752e57ec394d84238c7466c")
        );
    }

    #[test]
    fn test_hashed_key_is_sha256() {
        let public = [0x42u8; KEY_LEN];
        let expected: [u8; 32] = Sha256::digest(public).into();
        assert_eq!(hashed_advertisement_key(&public), expected);
    }

    #[test]
    fn test_invalid_seed_length() {
        assert!(matches!(derive(&[0u8; 31], 0), Err(KeyError::InvalidSeed(31))));
        assert!(matches!(derive(&[0u8; 33], 0), Err(KeyError::InvalidSeed(33))));
        assert!(matches!(
            Seed::from_hex("abcd"),
            Err(KeyError::InvalidSeed(2))
        ));
        assert!(matches!(
            Seed::from_hex("zz"),
            Err(KeyError::InvalidSeedHex(_))
        ));
    }

    #[test]
    fn test_seed_hex_roundtrip() {
        let seed = Seed::generate();
        let parsed = Seed::from_hex(&seed.to_hex()).unwrap();
        assert_eq!(seed, parsed);
        assert_eq!(format!("{:?}", seed), "Seed(..)");
    }

    #[test]
    fn test_zero_scalar_rejected() {
        assert!(public_x_for_scalar(&[0u8; KEY_LEN]).is_none());
        assert!(public_x_for_scalar(&[0xFFu8; KEY_LEN]).is_none());
    }

    #[test]
    fn test_intervals_for_hours() {
        let schedule = KeySchedule::new(Seed::new([0u8; 32]), 900);
        assert_eq!(schedule.intervals_for_hours(24), 96);
        assert_eq!(schedule.intervals_for_hours(0), 0);
        assert_eq!(schedule.counter_for_offset(2), 8);
        assert_eq!(schedule.counter_for_offset(-5), 0);
    }

    #[test]
    fn test_entries_are_consecutive() {
        let schedule = KeySchedule::new(Seed::new([7u8; 32]), 900);
        let entries = schedule.entries(10, 4).unwrap();
        let counters: Vec<u32> = entries.iter().map(|e| e.counter).collect();
        assert_eq!(counters, vec![10, 11, 12, 13]);
        assert_eq!(entries[2], schedule.entry(12).unwrap());
    }

    #[test]
    fn test_entries_stop_at_counter_limit() {
        let schedule = KeySchedule::new(Seed::new([7u8; 32]), 900);
        let entries = schedule.entries(u32::MAX - 1, 5).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].counter, u32::MAX);
    }
}
