//! Provisioning configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration:
//!
//! ```toml
//! [tools]
//! console = "/opt/SEGGER/JLink/JLinkExe"
//!
//! [timeouts]
//! flash = 30
//!
//! [firmware]
//! project_root = "/srv/tagfw"
//! advertising_base_ms = 2000
//! advertising_step_ms = 10
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::keys::keyfile::MAX_KEYFILE_KEYS;
use crate::keys::DEFAULT_ROTATION_SECS;

/// Locations searched when no configuration file is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["tagflasher.toml", "/etc/tagflasher/config.toml"];

/// Complete provisioning configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// External tool executables
    pub tools: ToolPaths,
    /// Per-invocation timeouts
    pub timeouts: Timeouts,
    /// Key generation settings
    pub keys: KeySettings,
    /// Firmware build settings
    pub firmware: FirmwareSettings,
    /// Output directories
    pub paths: OutputPaths,
    /// Batch mode settings
    pub autoflash: AutoFlashSettings,
}

/// External tool executables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    /// Firmware builder
    pub make: String,
    /// Format converter
    pub objcopy: String,
    /// Native vendor flashing tool
    pub native: String,
    /// Scripted debug console
    pub console: String,
    /// Generic debug bridge
    pub openocd: String,
    /// Extra OpenOCD script search directory (`-s`)
    pub openocd_scripts: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            make: "make".into(),
            objcopy: "arm-none-eabi-objcopy".into(),
            native: "nrfjprog".into(),
            console: "JLinkExe".into(),
            openocd: "openocd".into(),
            openocd_scripts: None,
        }
    }
}

/// Timeouts in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Firmware build
    pub build: u64,
    /// Single format conversion
    pub convert: u64,
    /// Whole flash attempt through the console or OpenOCD
    pub flash: u64,
    /// Each native tool programming step
    pub native_step: u64,
    /// Native tool reset
    pub native_reset: u64,
    /// Probe-only connect
    pub probe: u64,
    /// Hardware-info register read
    pub identify: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build: 300,
            convert: 30,
            flash: 20,
            native_step: 10,
            native_reset: 5,
            probe: 8,
            identify: 3,
        }
    }
}

impl Timeouts {
    /// Whole flash attempt timeout
    pub fn flash(&self) -> Duration {
        Duration::from_secs(self.flash)
    }

    /// Probe-only connect timeout
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }

    /// Hardware-info register read timeout
    pub fn identify(&self) -> Duration {
        Duration::from_secs(self.identify)
    }
}

/// Key generation settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeySettings {
    /// Key rotation interval in seconds
    pub rotation_secs: u32,
    /// Keys written to the offline catalog in dynamic mode
    pub offline_count: usize,
    /// Keys generated for a static keyfile
    pub static_count: usize,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            rotation_secs: DEFAULT_ROTATION_SECS,
            offline_count: 200,
            static_count: 200,
        }
    }
}

/// Firmware build settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareSettings {
    /// Directory that chip project directories are relative to
    pub project_root: PathBuf,
    /// Total device name length
    pub name_width: usize,
    /// Advertising interval of device number zero, in milliseconds
    pub advertising_base_ms: u32,
    /// Advertising interval increment per device number
    pub advertising_step_ms: u32,
    /// Board has a DC/DC converter
    pub has_dcdc: bool,
    /// Program the SoftDevice along with the application
    pub flash_softdevice: bool,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            name_width: 6,
            advertising_base_ms: 1000,
            advertising_step_ms: 0,
            has_dcdc: false,
            flash_softdevice: true,
        }
    }
}

/// Output directories
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputPaths {
    /// Per-session build workspaces
    pub workspace: PathBuf,
    /// Seeds, one subdirectory per device
    pub seeds: PathBuf,
    /// Keyfiles and key catalogs
    pub keys: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("work"),
            seeds: PathBuf::from("seeds"),
            keys: PathBuf::from("keys"),
        }
    }
}

/// Batch mode settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoFlashSettings {
    /// Delay between connection attempts, in milliseconds
    pub debounce_ms: u64,
    /// Delay between board-removal checks, in milliseconds
    pub removal_poll_ms: u64,
}

impl Default for AutoFlashSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            removal_poll_ms: 500,
        }
    }
}

impl ProvisionConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, else the first default location that exists,
    /// else the built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_toml_file(path);
        }
        for candidate in DEFAULT_CONFIG_PATHS.iter().map(Path::new) {
            if candidate.is_file() {
                log::debug!("Using configuration {}", candidate.display());
                return Self::from_toml_file(candidate);
            }
        }
        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.rotation_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "keys.rotation_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.keys.static_count == 0 || self.keys.static_count > MAX_KEYFILE_KEYS {
            return Err(ConfigError::InvalidValue {
                field: "keys.static_count",
                reason: format!("must be between 1 and {}", MAX_KEYFILE_KEYS),
            });
        }
        if self.firmware.name_width == 0 {
            return Err(ConfigError::InvalidValue {
                field: "firmware.name_width",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
