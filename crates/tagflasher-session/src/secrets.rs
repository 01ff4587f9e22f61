//! Per-device secret material
//!
//! In dynamic mode each device gets a fresh seed that is stored under the
//! seeds directory and patched into the firmware; the device derives its
//! rotating keys from it. An offline catalog of the first keys is written
//! alongside so reports can be fetched before the seed reaches a server.
//!
//! In static mode the device gets a fixed table of public keys. The table
//! is reused from `<name>_keyfile` if one exists, otherwise fresh keys are
//! generated and their private halves written to the key catalog.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tagflasher_core::config::{KeySettings, OutputPaths};
use tagflasher_core::error::{ConfigError, KeyError};
use tagflasher_core::keys::export::{device_catalog_json, render_keys_listing};
use tagflasher_core::keys::keyfile::generate_static_keys;
use tagflasher_core::keys::{CatalogKey, KeySchedule, Keyfile, Seed};
use tagflasher_core::patch::{KEY_MARKER, SEED_MARKER};
use tagflasher_core::Result;

use crate::builder::BuildKeys;

/// Key provisioning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    /// Seed-derived rotating keys
    #[default]
    Dynamic,
    /// Fixed public key table
    Static,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Dynamic => f.write_str("dynamic"),
            KeyMode::Static => f.write_str("static"),
        }
    }
}

impl FromStr for KeyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" => Ok(KeyMode::Dynamic),
            "static" => Ok(KeyMode::Static),
            _ => Err(ConfigError::InvalidValue {
                field: "mode",
                reason: format!("expected dynamic or static, got {:?}", s),
            }),
        }
    }
}

/// What gets patched into one device's firmware
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceSecret {
    /// Placeholder marker to overwrite
    pub marker: &'static [u8],
    /// Bytes written at the marker
    pub payload: Vec<u8>,
    /// Matching build flags
    pub build_keys: BuildKeys,
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSecret")
            .field("marker", &String::from_utf8_lossy(self.marker))
            .field("payload_len", &self.payload.len())
            .field("build_keys", &self.build_keys)
            .finish()
    }
}

/// Files holding a dynamic device's seed
pub fn seed_paths(paths: &OutputPaths, device_name: &str) -> (PathBuf, PathBuf) {
    let dir = paths.seeds.join(device_name);
    (
        dir.join(format!("seed_{}.hex", device_name)),
        dir.join(format!("seed_{}.bin", device_name)),
    )
}

/// Keyfile location for a static device
pub fn keyfile_path(paths: &OutputPaths, device_name: &str) -> PathBuf {
    paths.keys.join(format!("{}_keyfile", device_name))
}

/// Prepare the secret for `device_name`, writing its key files
pub fn prepare_secret(
    mode: KeyMode,
    device_name: &str,
    settings: &KeySettings,
    paths: &OutputPaths,
) -> Result<DeviceSecret> {
    match mode {
        KeyMode::Dynamic => prepare_dynamic(device_name, settings, paths),
        KeyMode::Static => prepare_static(device_name, settings, paths),
    }
}

fn prepare_dynamic(
    device_name: &str,
    settings: &KeySettings,
    paths: &OutputPaths,
) -> Result<DeviceSecret> {
    let seed = Seed::generate();
    let (hex_path, bin_path) = seed_paths(paths, device_name);
    if let Some(dir) = hex_path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&hex_path, seed.to_hex())?;
    fs::write(&bin_path, seed.as_bytes())?;
    log::info!("Seed for {} saved to {}", device_name, hex_path.display());

    let payload = seed.as_bytes().to_vec();
    let schedule = KeySchedule::new(seed, settings.rotation_secs);
    if let Err(e) = write_offline_catalog(&schedule, device_name, settings.offline_count, &paths.keys) {
        log::warn!("Offline key catalog for {} not written: {}", device_name, e);
    }

    Ok(DeviceSecret {
        marker: SEED_MARKER,
        payload,
        build_keys: BuildKeys::Dynamic,
    })
}

fn write_offline_catalog(
    schedule: &KeySchedule,
    device_name: &str,
    count: usize,
    keys_dir: &Path,
) -> Result<()> {
    let entries = schedule.entries(0, count)?;
    write_catalog(device_name, &entries, keys_dir)?;
    log::info!(
        "Offline catalog with {} keys written for {}",
        entries.len(),
        device_name
    );
    Ok(())
}

fn write_catalog<K: CatalogKey>(device_name: &str, keys: &[K], keys_dir: &Path) -> Result<()> {
    fs::create_dir_all(keys_dir)?;
    fs::write(
        keys_dir.join(format!("{}_devices.json", device_name)),
        device_catalog_json(device_name, keys)?,
    )?;
    fs::write(
        keys_dir.join(format!("{}.keys", device_name)),
        render_keys_listing(keys),
    )?;
    Ok(())
}

/// Generate `count` static keys for `device_name`.
///
/// Writes `<name>_keyfile` with the public keys, plus the device catalog
/// and `.keys` listing holding the private keys, into `keys_dir`.
pub fn generate_keyfile(device_name: &str, count: usize, keys_dir: &Path) -> Result<Keyfile> {
    let keys = generate_static_keys(count)?;
    let keyfile = Keyfile::from_static_keys(&keys)?;
    fs::create_dir_all(keys_dir)?;
    fs::write(
        keys_dir.join(format!("{}_keyfile", device_name)),
        keyfile.to_bytes(),
    )?;
    write_catalog(device_name, &keys, keys_dir)?;
    log::info!("Generated {} static keys for {}", keys.len(), device_name);
    Ok(keyfile)
}

fn prepare_static(
    device_name: &str,
    settings: &KeySettings,
    paths: &OutputPaths,
) -> Result<DeviceSecret> {
    let path = keyfile_path(paths, device_name);
    let keyfile = if path.is_file() {
        let keyfile = Keyfile::parse(&fs::read(&path)?)?;
        log::info!(
            "Using existing keyfile {} ({} keys)",
            path.display(),
            keyfile.len()
        );
        keyfile
    } else {
        generate_keyfile(device_name, settings.static_count, &paths.keys)?
    };
    if keyfile.is_empty() {
        return Err(KeyError::KeyfileEmpty.into());
    }

    Ok(DeviceSecret {
        marker: KEY_MARKER,
        payload: keyfile.key_payload(),
        build_keys: BuildKeys::Static {
            count: keyfile.len(),
        },
    })
}
