//! Error types for tagflasher
//!
//! Each concern of the provisioning pipeline has its own error enum. The
//! top-level [`Error`] wraps all of them so a session can report any failure
//! through a single type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration and catalog errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Chip name or legacy id not present in the catalog
    #[error("Unknown chip: {0}")]
    UnknownChip(String),

    /// A required field was not supplied
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field was supplied with a value that cannot be used
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Failed to read a configuration or catalog file
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Chip catalog is not valid RON or fails validation
    #[error("Invalid chip catalog: {0}")]
    Catalog(String),
}

/// Hardware pre-check failures
#[derive(Debug, Error)]
pub enum HardwareError {
    /// No supported debug probe is attached
    #[error("No supported debugger found")]
    DebuggerMissing,

    /// Debug probe is attached but the target does not answer
    #[error("Target chip not responding: {0}")]
    ChipDisconnected(String),

    /// Target answers but debug access is locked
    #[error("Target chip is read-back protected: {0}")]
    ChipProtected(String),
}

/// Firmware build and conversion failures
#[derive(Debug, Error)]
pub enum BuildError {
    /// An external build tool exited unsuccessfully
    #[error("{tool} failed (exit code {code:?}): {output}")]
    ToolFailed {
        /// Tool that failed
        tool: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Trailing output of the tool
        output: String,
    },

    /// An external build tool could not be started or timed out
    #[error("{tool} could not be run: {reason}")]
    ToolUnavailable {
        /// Tool that could not run
        tool: String,
        /// Spawn or timeout error text
        reason: String,
    },

    /// The build finished but the expected artifact is missing
    #[error("Build artifact not found: {0}")]
    ArtifactMissing(PathBuf),
}

/// Firmware patching failures
#[derive(Debug, Error)]
pub enum PatchError {
    /// Marker bytes were not found in the image
    #[error("Placeholder marker {marker:?} not found in firmware image")]
    PlaceholderNotFound {
        /// Marker that was searched for, lossily decoded
        marker: String,
    },

    /// Secret would be written past the end of the image
    #[error("Secret of {len} bytes at offset 0x{offset:X} exceeds image size {image_len}")]
    SecretOutOfBounds {
        /// Patch offset
        offset: usize,
        /// Secret length
        len: usize,
        /// Image length
        image_len: usize,
    },
}

/// Flash attempt failures
#[derive(Debug, Error)]
pub enum FlashError {
    /// All backends failed; carries the last backend's report
    #[error("{backend} failed during {stage}: {detail}")]
    BackendFailed {
        /// Backend that made the last attempt
        backend: String,
        /// Last stage reached
        stage: String,
        /// Classified failure detail
        detail: String,
    },

    /// An external flashing tool did not finish in time
    #[error("{backend} timed out after {seconds}s during {stage}")]
    Timeout {
        /// Backend that timed out
        backend: String,
        /// Stage in progress when the timeout fired
        stage: String,
        /// Timeout that elapsed
        seconds: u64,
    },
}

/// Key derivation and keyfile errors
#[derive(Debug, Error)]
pub enum KeyError {
    /// Seed is not exactly 32 bytes
    #[error("Seed must be 32 bytes, got {0}")]
    InvalidSeed(usize),

    /// Seed text is not valid hex
    #[error("Seed is not valid hex: {0}")]
    InvalidSeedHex(#[from] hex::FromHexError),

    /// Derived scalar is zero or not below the curve order
    #[error("Derived scalar for counter {counter} is out of range")]
    ScalarOutOfRange {
        /// Counter that produced the scalar
        counter: u32,
    },

    /// Keyfile count header cannot represent the number of keys
    #[error("Keyfile can hold at most 255 keys, got {0}")]
    TooManyKeys(usize),

    /// Keyfile has no count header
    #[error("Keyfile is empty")]
    KeyfileEmpty,

    /// Keyfile body is shorter than its count header claims
    #[error("Keyfile truncated: header declares {expected} bytes of keys, found {actual}")]
    KeyfileTruncated {
        /// Bytes promised by the header
        expected: usize,
        /// Bytes present
        actual: usize,
    },
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Hardware pre-check error
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Build error
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Patch error
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Flash error
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// Key error
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization of an export failed
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The operation was stopped on request
    #[error("Operation stopped")]
    Stopped,
}

/// Result type for tagflasher operations
pub type Result<T> = std::result::Result<T, Error>;
