//! Key export formats
//!
//! - a plain text table for operators
//! - [`KeyRecord`] lists (JSON) with every field base64-encoded
//! - [`DeviceCatalogRecord`] (JSON) as consumed by report-fetching tools
//! - `.keys` text listings

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::schedule::KeyScheduleEntry;

/// Key material that can appear in a device catalog
pub trait CatalogKey {
    /// Private key bytes
    fn private_key(&self) -> &[u8];
    /// Advertised public key bytes
    fn public_key(&self) -> &[u8];
    /// SHA-256 of the public key
    fn hashed_adv_key(&self) -> &[u8];
}

impl CatalogKey for KeyScheduleEntry {
    fn private_key(&self) -> &[u8] {
        &self.private_scalar
    }

    fn public_key(&self) -> &[u8] {
        &self.public_x
    }

    fn hashed_adv_key(&self) -> &[u8] {
        &self.hashed_adv_key
    }
}

/// One schedule entry in the structured export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// Rotation counter
    pub counter: u32,
    /// Base64 private scalar
    pub private_key: String,
    /// Base64 public X coordinate
    pub public_key: String,
    /// Base64 hashed advertisement key
    pub hashed_adv_key: String,
}

impl From<&KeyScheduleEntry> for KeyRecord {
    fn from(entry: &KeyScheduleEntry) -> Self {
        Self {
            counter: entry.counter,
            private_key: STANDARD.encode(entry.private_scalar),
            public_key: STANDARD.encode(entry.public_x),
            hashed_adv_key: STANDARD.encode(entry.hashed_adv_key),
        }
    }
}

/// A device entry for report-fetching tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCatalogRecord {
    /// Device identifier
    pub id: String,
    /// RGBA display color
    pub color_components: [u8; 4],
    /// Display name
    pub name: String,
    /// Base64 private key of the first key
    pub private_key: String,
    /// Base64 hashed advertisement key of the first key
    pub hashed_adv_key: String,
    /// Icon name
    pub icon: String,
    /// Whether the tool should poll this device
    pub is_active: bool,
    /// Base64 private keys after the first
    pub additional_keys: Vec<String>,
    /// Base64 hashed advertisement keys after the first
    pub additional_hashed_adv_keys: Vec<String>,
}

impl DeviceCatalogRecord {
    /// Build a record from a device name and its keys.
    ///
    /// The first key becomes the primary key, all others go into the
    /// `additional*` lists. Returns `None` when `keys` is empty.
    pub fn new<K: CatalogKey>(device_name: &str, keys: &[K]) -> Option<Self> {
        let (first, rest) = keys.split_first()?;
        Some(Self {
            id: device_name.to_string(),
            color_components: [0, 1, 0, 1],
            name: device_name.to_string(),
            private_key: STANDARD.encode(first.private_key()),
            hashed_adv_key: STANDARD.encode(first.hashed_adv_key()),
            icon: String::new(),
            is_active: true,
            additional_keys: rest.iter().map(|k| STANDARD.encode(k.private_key())).collect(),
            additional_hashed_adv_keys: rest
                .iter()
                .map(|k| STANDARD.encode(k.hashed_adv_key()))
                .collect(),
        })
    }
}

/// Render entries as an operator-facing table
pub fn render_table(entries: &[KeyScheduleEntry]) -> String {
    let rule = "-".repeat(80);
    let mut out = format!(
        "{rule}\n{:<8} | {:<45} | {:<45}\n{rule}\n",
        "Counter", "Public Key (Base64)", "Hashed Adv Key (Base64)"
    );
    for entry in entries {
        out.push_str(&format!(
            "{:<8} | {:<45} | {:<45}\n",
            entry.counter,
            STANDARD.encode(entry.public_x),
            STANDARD.encode(entry.hashed_adv_key)
        ));
    }
    out
}

/// Serialize entries as a pretty-printed JSON list of [`KeyRecord`]s
pub fn records_json(entries: &[KeyScheduleEntry]) -> serde_json::Result<String> {
    let records: Vec<KeyRecord> = entries.iter().map(KeyRecord::from).collect();
    serde_json::to_string_pretty(&records)
}

/// Serialize a device catalog as a compact one-element JSON array.
///
/// An empty key list yields an empty array.
pub fn device_catalog_json<K: CatalogKey>(
    device_name: &str,
    keys: &[K],
) -> serde_json::Result<String> {
    let records: Vec<DeviceCatalogRecord> =
        DeviceCatalogRecord::new(device_name, keys).into_iter().collect();
    serde_json::to_string(&records)
}

/// Render a `.keys` listing, indexing keys from zero
pub fn render_keys_listing<K: CatalogKey>(keys: &[K]) -> String {
    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            format!(
                "Index: {}\nPrivate key: {}\nAdvertisement key: {}\nHashed adv key: {}\n\n",
                index,
                STANDARD.encode(key.private_key()),
                STANDARD.encode(key.public_key()),
                STANDARD.encode(key.hashed_adv_key())
            )
        })
        .collect()
}
