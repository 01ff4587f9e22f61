//! Target chip definitions
//!
//! Chip profiles are data: they are loaded from RON files (a built-in
//! catalog ships with the crate) and never mutated afterwards.

mod database;

pub use database::ChipCatalog;

use std::fmt;

use serde::Deserialize;

/// Chip family, which decides debug-port register layout and tool arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ChipFamily {
    /// nRF51 series
    Nrf51,
    /// nRF52 series
    Nrf52,
}

impl ChipFamily {
    /// Lowercase family name, as used by OpenOCD flash drivers
    pub fn name(self) -> &'static str {
        match self {
            ChipFamily::Nrf51 => "nrf51",
            ChipFamily::Nrf52 => "nrf52",
        }
    }

    /// Family argument for the native vendor tool (`-f`)
    pub fn native_tool_family(self) -> &'static str {
        match self {
            ChipFamily::Nrf51 => "NRF51",
            ChipFamily::Nrf52 => "NRF52",
        }
    }

    /// Address of the register that identifies the part
    pub fn info_register(self) -> u32 {
        match self {
            // FICR CONFIGID
            ChipFamily::Nrf51 => 0x1000_005C,
            // FICR INFO.PART
            ChipFamily::Nrf52 => 0x1000_0100,
        }
    }

    /// Extract the hardware id from a raw info register value
    pub fn hardware_id(self, raw: u32) -> u32 {
        match self {
            ChipFamily::Nrf51 => raw & 0xFFFF,
            ChipFamily::Nrf52 => raw,
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A supported target chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipProfile {
    /// Vendor name
    pub vendor: String,
    /// Part name (e.g. "nRF52832")
    pub name: String,
    /// Numeric id used by older front ends ("1".."4")
    pub legacy_id: Option<String>,
    /// Chip family
    pub family: ChipFamily,
    /// Firmware builder target; `None` for flash-only parts
    pub build_target: Option<String>,
    /// Firmware builder project directory
    pub project_dir: Option<String>,
    /// Application load address
    pub flash_offset: u32,
    /// SoftDevice HEX image path
    pub softdevice_image: String,
    /// OpenOCD target config
    pub debug_target_config: String,
    /// Device name for the scripted debug console
    pub console_device: String,
    /// Recognized hardware ids
    pub hardware_ids: Vec<u32>,
}

impl ChipProfile {
    /// Check a raw info register value against this chip
    pub fn matches_hardware_id(&self, raw: u32) -> bool {
        let id = self.family.hardware_id(raw);
        self.hardware_ids.contains(&id)
    }

    /// Whether firmware can be built for this chip
    pub fn is_buildable(&self) -> bool {
        self.build_target.is_some() && self.project_dir.is_some()
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_registers() {
        assert_eq!(ChipFamily::Nrf52.info_register(), 0x10000100);
        assert_eq!(ChipFamily::Nrf51.info_register(), 0x1000005C);
        assert_eq!(ChipFamily::Nrf51.hardware_id(0xFFFF_0072), 0x0072);
        assert_eq!(ChipFamily::Nrf52.hardware_id(0x52832), 0x52832);
        assert_eq!(ChipFamily::Nrf52.native_tool_family(), "NRF52");
        assert_eq!(ChipFamily::Nrf51.to_string(), "nrf51");
    }
}
