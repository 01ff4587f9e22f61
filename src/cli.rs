//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tagflasher_flash::DebuggerBackend;
use tagflasher_session::KeyMode;

/// Parse a debugger backend name
fn parse_backend(s: &str) -> Result<DebuggerBackend, String> {
    s.parse()
}

/// Parse a key mode name
fn parse_mode(s: &str) -> Result<KeyMode, String> {
    s.parse().map_err(|e: tagflasher_core::error::ConfigError| e.to_string())
}

#[derive(Parser)]
#[command(name = "tagflasher")]
#[command(author, version, about = "BLE tracker tag provisioning", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Chip catalog file or directory (.ron) to use instead of the built-in one
    #[arg(long, global = true)]
    pub chip_db: Option<PathBuf>,

    /// Configuration file (TOML)
    /// Defaults to ./tagflasher.toml, then /etc/tagflasher/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Key export output formats
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Human-readable table
    Table,
    /// JSON list with every field base64-encoded
    Json,
    /// Device catalog JSON for report fetching
    Catalog,
    /// Indexed `.keys` listing
    Keys,
}

/// Which placeholder to patch
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerKind {
    /// 32-byte seed placeholder
    Seed,
    /// Public key table placeholder
    Key,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, patch and flash one device (or many with --auto)
    Provision {
        /// Chip name or legacy id
        #[arg(short, long)]
        chip: String,

        /// Device name prefix
        #[arg(short, long)]
        prefix: String,

        /// First device number
        #[arg(short, long, default_value = "0")]
        start: u32,

        /// Key mode (dynamic or static)
        #[arg(short, long, default_value = "dynamic", value_parser = parse_mode)]
        mode: KeyMode,

        /// Debugger backend (jlink, jlink-console, stlink, cmsis-dap, openocd:<cfg>)
        /// Detected over USB if not specified
        #[arg(short, long, value_parser = parse_backend)]
        backend: Option<DebuggerBackend>,

        /// Keep flashing boards as they are connected until interrupted
        #[arg(long)]
        auto: bool,

        /// Don't program the SoftDevice
        #[arg(long)]
        no_softdevice: bool,

        /// Board has a DC/DC converter (overrides the configuration)
        #[arg(long)]
        dcdc: bool,
    },

    /// Flash a prebuilt HEX image without building or patching
    Flash {
        /// Chip name or legacy id
        #[arg(short, long)]
        chip: String,

        /// HEX image to program
        #[arg(short, long)]
        image: PathBuf,

        /// Debugger backend, detected over USB if not specified
        #[arg(short, long, value_parser = parse_backend)]
        backend: Option<DebuggerBackend>,

        /// Program the chip's SoftDevice first
        #[arg(long)]
        softdevice: bool,
    },

    /// Detect the debug probe and identify the attached chip
    Detect {
        /// Expected chip, used for the connectivity fallback
        #[arg(short, long, default_value = "nRF52832")]
        chip: String,

        /// Debugger backend, detected over USB if not specified
        #[arg(short, long, value_parser = parse_backend)]
        backend: Option<DebuggerBackend>,
    },

    /// Key generation and export
    #[command(subcommand)]
    Keys(KeysCommands),

    /// Patch a secret into a flat firmware image
    Patch {
        /// Input binary image
        #[arg(short, long)]
        input: PathBuf,

        /// Output binary image
        #[arg(short, long)]
        output: PathBuf,

        /// Placeholder to overwrite
        #[arg(short, long, value_enum)]
        marker: MarkerKind,

        /// File holding the secret (seed .bin or keyfile)
        #[arg(short, long)]
        secret: PathBuf,
    },

    /// List supported chips
    ListChips {
        /// Filter by family (nrf51, nrf52)
        #[arg(long)]
        family: Option<String>,
    },
}

/// Key subcommands
#[derive(Subcommand)]
pub enum KeysCommands {
    /// Derive a device's rotating keys from its seed
    Export {
        /// Seed as 64 hex characters
        #[arg(long, conflicts_with = "seed_file", required_unless_present = "seed_file")]
        seed: Option<String>,

        /// Seed file (raw 32 bytes, or hex text)
        #[arg(long)]
        seed_file: Option<PathBuf>,

        /// Hours of keys to export
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Window start in hours after device boot
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        offset: i64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: ExportFormat,

        /// Device name for catalog output
        #[arg(short, long, default_value = "tag")]
        name: String,

        /// Output file (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a static keyfile and its key catalog
    Static {
        /// Device name
        #[arg(short, long)]
        name: String,

        /// Number of keys (at most 255)
        #[arg(short, long)]
        count: Option<usize>,

        /// Output directory (defaults to the configured keys directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
