//! Debug probe detection
//!
//! Probes are recognized from their USB descriptors. Strings are matched
//! first; vendor/product ids cover probes whose strings cannot be read
//! without elevated permissions.

use std::fmt;
use std::str::FromStr;

use nusb::MaybeFuture;
use thiserror::Error;

/// SEGGER vendor id
const SEGGER_VID: u16 = 0x1366;
/// STMicroelectronics vendor id
const ST_VID: u16 = 0x0483;
/// ST-Link V2, V2-1, V3 product ids
const STLINK_PIDS: &[u16] = &[0x3748, 0x374B, 0x374E, 0x374F, 0x3752, 0x3753, 0x3754];

/// OpenOCD interface config for ST-Link probes
pub const STLINK_INTERFACE: &str = "interface/stlink.cfg";
/// OpenOCD interface config for CMSIS-DAP probes
pub const CMSIS_DAP_INTERFACE: &str = "interface/cmsis-dap.cfg";

/// Probes that are driven through OpenOCD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOcdProbe {
    /// CMSIS-DAP or DAPLink
    CmsisDap,
    /// ST-Link
    StLink,
}

impl OpenOcdProbe {
    /// OpenOCD interface config for this probe
    pub fn interface_config(self) -> &'static str {
        match self {
            OpenOcdProbe::CmsisDap => CMSIS_DAP_INTERFACE,
            OpenOcdProbe::StLink => STLINK_INTERFACE,
        }
    }
}

/// Result of probe detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedDebugger {
    /// SEGGER J-Link
    NativeVendorProbe,
    /// A probe OpenOCD can drive
    OpenOcdCompatible(OpenOcdProbe),
}

impl fmt::Display for DetectedDebugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectedDebugger::NativeVendorProbe => f.write_str("J-Link"),
            DetectedDebugger::OpenOcdCompatible(OpenOcdProbe::CmsisDap) => {
                f.write_str("CMSIS-DAP")
            }
            DetectedDebugger::OpenOcdCompatible(OpenOcdProbe::StLink) => f.write_str("ST-Link"),
        }
    }
}

/// How a session talks to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerBackend {
    /// Native vendor tool, falling back to the scripted console
    NativeVendorProbe,
    /// Scripted debug console only
    ScriptedDebugConsole,
    /// OpenOCD with the given interface config
    OpenOcd(String),
}

impl From<DetectedDebugger> for DebuggerBackend {
    fn from(detected: DetectedDebugger) -> Self {
        match detected {
            DetectedDebugger::NativeVendorProbe => DebuggerBackend::NativeVendorProbe,
            DetectedDebugger::OpenOcdCompatible(probe) => {
                DebuggerBackend::OpenOcd(probe.interface_config().to_string())
            }
        }
    }
}

impl fmt::Display for DebuggerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebuggerBackend::NativeVendorProbe => f.write_str("jlink"),
            DebuggerBackend::ScriptedDebugConsole => f.write_str("jlink-console"),
            DebuggerBackend::OpenOcd(cfg) => write!(f, "openocd:{}", cfg),
        }
    }
}

impl FromStr for DebuggerBackend {
    type Err = String;

    /// Accepts `jlink`, `jlink-console`, `stlink`, `cmsis-dap`,
    /// `openocd:<interface cfg>`, and the legacy ids `1` (J-Link) and
    /// `2` (ST-Link).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(cfg) = s.strip_prefix("openocd:") {
            if cfg.is_empty() {
                return Err("openocd: requires an interface config".into());
            }
            return Ok(DebuggerBackend::OpenOcd(cfg.to_string()));
        }
        match s.to_ascii_lowercase().as_str() {
            "1" | "jlink" | "j-link" | "native" => Ok(DebuggerBackend::NativeVendorProbe),
            "jlink-console" | "console" => Ok(DebuggerBackend::ScriptedDebugConsole),
            "2" | "stlink" | "st-link" => Ok(DebuggerBackend::OpenOcd(STLINK_INTERFACE.into())),
            "cmsis-dap" | "daplink" => Ok(DebuggerBackend::OpenOcd(CMSIS_DAP_INTERFACE.into())),
            other => Err(format!("Unknown debugger backend: {}", other)),
        }
    }
}

/// The parts of a USB device descriptor used for classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbDescriptor {
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
}

impl UsbDescriptor {
    fn text(&self) -> String {
        let mut text = String::new();
        for s in [&self.manufacturer, &self.product].into_iter().flatten() {
            text.push_str(s);
            text.push(' ');
        }
        text
    }

    fn is_native_probe(&self) -> bool {
        let text = self.text();
        self.vendor_id == SEGGER_VID || text.contains("J-Link") || text.contains("SEGGER")
    }

    fn is_cmsis_dap(&self) -> bool {
        let text = self.text();
        text.contains("CMSIS-DAP") || text.contains("DAPLink")
    }

    fn is_stlink(&self) -> bool {
        if self.vendor_id == ST_VID && STLINK_PIDS.contains(&self.product_id) {
            return true;
        }
        let text = self.text();
        ["STLink", "ST-Link", "STLINK"].iter().any(|p| text.contains(p))
            || text.to_lowercase().contains("stlink")
    }
}

/// Pick the highest-priority probe among `devices`.
///
/// Priority is J-Link, then CMSIS-DAP, then ST-Link, regardless of
/// enumeration order.
pub fn classify(devices: &[UsbDescriptor]) -> Option<DetectedDebugger> {
    if devices.iter().any(UsbDescriptor::is_native_probe) {
        return Some(DetectedDebugger::NativeVendorProbe);
    }
    if devices.iter().any(UsbDescriptor::is_cmsis_dap) {
        return Some(DetectedDebugger::OpenOcdCompatible(OpenOcdProbe::CmsisDap));
    }
    if devices.iter().any(UsbDescriptor::is_stlink) {
        return Some(DetectedDebugger::OpenOcdCompatible(OpenOcdProbe::StLink));
    }
    None
}

/// USB access failures
#[derive(Debug, Error)]
pub enum UsbError {
    /// The host's device list could not be read
    #[error("USB enumeration failed: {0}")]
    Enumerate(String),
}

/// Enumerate attached USB devices
pub fn list_usb_devices() -> Result<Vec<UsbDescriptor>, UsbError> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| UsbError::Enumerate(e.to_string()))?
        .map(|d| UsbDescriptor {
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            manufacturer: d.manufacturer_string().map(str::to_string),
            product: d.product_string().map(str::to_string),
        })
        .collect();
    Ok(devices)
}

/// Look for an attached debug probe
pub fn detect_debugger() -> Option<DetectedDebugger> {
    let devices = match list_usb_devices() {
        Ok(devices) => devices,
        Err(e) => {
            log::warn!("{}", e);
            return None;
        }
    };
    log::debug!("Enumerated {} USB devices", devices.len());

    let detected = classify(&devices);
    match detected {
        Some(d) => log::info!("Detected debugger: {}", d),
        None => log::info!("No supported debugger found"),
    }
    detected
}
