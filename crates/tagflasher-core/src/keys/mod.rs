//! Tag identity keys
//!
//! Two provisioning modes exist. In dynamic mode the tag receives a 32-byte
//! seed and derives a new P-224 key every rotation interval; the host runs
//! the same [`KeySchedule`] to know which keys the tag will advertise. In
//! static mode the tag receives a fixed list of public keys from a
//! [`keyfile`].

pub mod export;
pub mod keyfile;
pub mod schedule;

pub use export::{CatalogKey, DeviceCatalogRecord, KeyRecord};
pub use keyfile::{Keyfile, StaticKey};
pub use schedule::{
    derive, hashed_advertisement_key, KeySchedule, KeyScheduleEntry, Seed,
    DEFAULT_ROTATION_SECS, HASHED_KEY_LEN, KEY_LEN, SEED_LEN,
};
