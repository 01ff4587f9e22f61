//! Chip catalog for runtime loading and lookup
//!
//! This module provides the `ChipCatalog` type for loading chip profiles
//! from RON files at runtime. A built-in catalog covering the supported
//! Nordic parts is compiled into the crate.

use std::fs;
use std::path::Path;

use super::{ChipFamily, ChipProfile};
use crate::error::ConfigError;

const BUILTIN_CATALOG: &str = include_str!("../../chips/nordic.ron");

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Single chip definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct ChipDef {
    name: String,
    #[serde(default)]
    legacy_id: Option<String>,
    family: ChipFamily,
    #[serde(default)]
    build_target: Option<String>,
    #[serde(default)]
    project_dir: Option<String>,
    flash_offset: u32,
    softdevice: String,
    debug_target_config: String,
    console_device: String,
    #[serde(default)]
    hardware_ids: Vec<u32>,
}

/// Vendor definition containing multiple chips
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    chips: Vec<ChipDef>,
}

// ============================================================================
// Chip catalog
// ============================================================================

/// Runtime chip catalog
#[derive(Debug, Clone, Default)]
pub struct ChipCatalog {
    chips: Vec<ChipProfile>,
}

impl ChipCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self { chips: Vec::new() }
    }

    /// The catalog compiled into the crate
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut catalog = Self::new();
        catalog.load_ron(BUILTIN_CATALOG)?;
        Ok(catalog)
    }

    /// Load chip definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_ron(&content)
    }

    /// Load chip definitions from a RON string.
    ///
    /// A chip whose name is already present replaces the earlier profile.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, ConfigError> {
        let vendor_def: VendorDef =
            ron::from_str(content).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        let count = vendor_def.chips.len();

        for chip_def in vendor_def.chips {
            if chip_def.build_target.is_some() != chip_def.project_dir.is_some() {
                return Err(ConfigError::Catalog(format!(
                    "{}: build_target and project_dir must be given together",
                    chip_def.name
                )));
            }

            let chip = ChipProfile {
                vendor: vendor_def.vendor.clone(),
                name: chip_def.name,
                legacy_id: chip_def.legacy_id,
                family: chip_def.family,
                build_target: chip_def.build_target,
                project_dir: chip_def.project_dir,
                flash_offset: chip_def.flash_offset,
                softdevice_image: chip_def.softdevice,
                debug_target_config: chip_def.debug_target_config,
                console_device: chip_def.console_device,
                hardware_ids: chip_def.hardware_ids,
            };

            if let Some(existing) = self.chips.iter_mut().find(|c| c.name == chip.name) {
                log::debug!("Overriding chip profile {}", chip.name);
                *existing = chip;
            } else {
                self.chips.push(chip);
            }
        }

        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ConfigError> {
        let read_err = |source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        };
        let mut total = 0;

        for entry in fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get all chips in the catalog
    pub fn chips(&self) -> &[ChipProfile] {
        &self.chips
    }

    /// Get the number of chips in the catalog
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    /// Find a chip by exact name (case-insensitive) or legacy numeric id
    pub fn find(&self, key: &str) -> Option<&ChipProfile> {
        self.chips.iter().find(|c| {
            c.name.eq_ignore_ascii_case(key) || c.legacy_id.as_deref() == Some(key)
        })
    }

    /// Like [`find`](Self::find), but unknown chips are a configuration error
    pub fn resolve(&self, key: &str) -> Result<&ChipProfile, ConfigError> {
        self.find(key)
            .ok_or_else(|| ConfigError::UnknownChip(key.to_string()))
    }

    /// Chips of a family, in catalog order
    pub fn by_family(&self, family: ChipFamily) -> impl Iterator<Item = &ChipProfile> {
        self.chips.iter().filter(move |c| c.family == family)
    }

    /// Find the chip matching a raw info register value read from `family`
    pub fn find_by_hardware_id(&self, family: ChipFamily, raw: u32) -> Option<&ChipProfile> {
        self.by_family(family).find(|c| c.matches_hardware_id(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = ChipCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), 4);

        let nrf51 = catalog.resolve("1").unwrap();
        assert_eq!(nrf51.name, "nRF51822");
        assert_eq!(nrf51.family, ChipFamily::Nrf51);
        assert_eq!(nrf51.flash_offset, 0x1B000);
        assert_eq!(nrf51.build_target.as_deref(), Some("nrf51822_xxab"));
        assert_eq!(nrf51.console_device, "nRF51822_xxAA");

        let nrf52832 = catalog.resolve("nrf52832").unwrap();
        assert_eq!(nrf52832.flash_offset, 0x26000);
        assert_eq!(nrf52832.debug_target_config, "target/nrf52.cfg");

        assert_eq!(catalog.resolve("3").unwrap().flash_offset, 0x19000);
        assert!(!catalog.resolve("nRF52811").unwrap().is_buildable());
    }

    #[test]
    fn test_unknown_chip() {
        let catalog = ChipCatalog::builtin().unwrap();
        assert!(matches!(
            catalog.resolve("9"),
            Err(ConfigError::UnknownChip(id)) if id == "9"
        ));
    }

    #[test]
    fn test_find_by_hardware_id() {
        let catalog = ChipCatalog::builtin().unwrap();
        assert_eq!(
            catalog
                .find_by_hardware_id(ChipFamily::Nrf52, 0x52810)
                .map(|c| c.name.as_str()),
            Some("nRF52810")
        );
        assert_eq!(
            catalog
                .find_by_hardware_id(ChipFamily::Nrf51, 0xFFFF_0072)
                .map(|c| c.name.as_str()),
            Some("nRF51822")
        );
        assert!(catalog
            .find_by_hardware_id(ChipFamily::Nrf51, 0x52832)
            .is_none());
        assert!(catalog
            .find_by_hardware_id(ChipFamily::Nrf52, 0xFFFF_FFFF)
            .is_none());
    }

    #[test]
    fn test_override_and_validation() {
        let mut catalog = ChipCatalog::builtin().unwrap();
        let custom = r#"(
            vendor: "Nordic Semiconductor",
            chips: [(
                name: "nRF52832",
                family: Nrf52,
                build_target: Some("custom_target"),
                project_dir: Some("fw/custom"),
                flash_offset: 0x27000,
                softdevice: "sd.hex",
                debug_target_config: "target/nrf52.cfg",
                console_device: "nRF52832_xxAA",
            )],
        )"#;
        assert_eq!(catalog.load_ron(custom).unwrap(), 1);
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.resolve("nRF52832").unwrap().flash_offset, 0x27000);

        let broken = r#"(
            vendor: "X",
            chips: [(
                name: "Y",
                family: Nrf52,
                build_target: Some("t"),
                flash_offset: 0,
                softdevice: "",
                debug_target_config: "",
                console_device: "",
            )],
        )"#;
        assert!(matches!(
            ChipCatalog::new().load_ron(broken),
            Err(ConfigError::Catalog(_))
        ));
        assert!(ChipCatalog::new().load_ron("not ron").is_err());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nordic.ron"), BUILTIN_CATALOG).unwrap();
        std::fs::write(dir.path().join("README"), "ignored").unwrap();
        let mut catalog = ChipCatalog::new();
        assert_eq!(catalog.load_dir(dir.path()).unwrap(), 4);
    }
}
