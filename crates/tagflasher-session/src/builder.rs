//! Firmware builds
//!
//! The firmware project is built by an external `make`. Every build starts
//! from a clean tree since the build flags differ per device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tagflasher_core::chip::ChipProfile;
use tagflasher_core::error::{BuildError, ConfigError};
use tagflasher_core::Result;
use tagflasher_flash::runner::{CommandRunner, CommandSpec, RunError};

/// Lines of tool output kept in build errors
const OUTPUT_TAIL_LINES: usize = 20;

/// How the firmware gets its keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKeys {
    /// Keys derived on the device from a patched seed
    Dynamic,
    /// A patched table of `count` public keys
    Static {
        /// Number of keys in the table
        count: usize,
    },
}

/// Per-device build parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
    /// Board has a DC/DC converter
    pub has_dcdc: bool,
    /// Key rotation interval in seconds
    pub rotation_secs: u32,
    /// Advertising interval in milliseconds
    pub advertising_interval_ms: u32,
    /// Key mode
    pub keys: BuildKeys,
}

impl BuildFlags {
    /// `NAME=value` arguments for the builder
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("HAS_DCDC={}", u8::from(self.has_dcdc)),
            "HAS_BATTERY=1".to_string(),
            format!("KEY_ROTATION_INTERVAL={}", self.rotation_secs),
            format!("ADVERTISING_INTERVAL={}", self.advertising_interval_ms),
        ];
        match self.keys {
            BuildKeys::Dynamic => args.push("DYNAMIC_KEYS=1".to_string()),
            BuildKeys::Static { count } => args.push(format!("MAX_KEYS={}", count)),
        }
        args
    }
}

/// Builds a firmware image for a chip
pub trait FirmwareBuilder: Send + Sync {
    /// Build and return the path of the produced HEX image
    fn build(&self, chip: &ChipProfile, flags: &BuildFlags) -> Result<PathBuf>;
}

/// Builds with `make -C <project>`
pub struct MakeBuilder {
    program: String,
    project_root: PathBuf,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl MakeBuilder {
    /// Create a builder running `program` below `project_root`
    pub fn new(
        program: impl Into<String>,
        project_root: impl Into<PathBuf>,
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            program: program.into(),
            project_root: project_root.into(),
            timeout,
            runner,
        }
    }

    /// Location of the HEX image `make` produces for `target`
    pub fn artifact_path(project: &Path, target: &str) -> PathBuf {
        project.join("_build").join(format!("{}.hex", target))
    }

    fn command(&self, project: &Path) -> CommandSpec {
        CommandSpec::new(&self.program, self.timeout)
            .arg("-C")
            .arg(project.to_string_lossy())
    }

    fn unavailable(&self, err: RunError) -> BuildError {
        BuildError::ToolUnavailable {
            tool: self.program.clone(),
            reason: err.to_string(),
        }
    }
}

impl FirmwareBuilder for MakeBuilder {
    fn build(&self, chip: &ChipProfile, flags: &BuildFlags) -> Result<PathBuf> {
        let (Some(target), Some(project_dir)) = (&chip.build_target, &chip.project_dir) else {
            return Err(ConfigError::InvalidValue {
                field: "chip",
                reason: format!("{} has no firmware build target", chip.name),
            }
            .into());
        };
        let project = self.project_root.join(project_dir);

        let clean = self.command(&project).arg("clean");
        let out = self.runner.run(&clean).map_err(|e| self.unavailable(e))?;
        if !out.success() {
            log::warn!("{} clean failed: {}", self.program, out.tail(3));
        }

        let build = self.command(&project).arg(target.as_str()).args(flags.to_args());
        log::info!("Building {} for {}", target, chip.name);
        let out = self.runner.run(&build).map_err(|e| self.unavailable(e))?;
        if !out.success() {
            return Err(BuildError::ToolFailed {
                tool: self.program.clone(),
                code: out.code,
                output: out.tail(OUTPUT_TAIL_LINES),
            }
            .into());
        }

        let artifact = Self::artifact_path(&project, target);
        if !artifact.is_file() {
            return Err(BuildError::ArtifactMissing(artifact).into());
        }
        log::debug!("Build produced {}", artifact.display());
        Ok(artifact)
    }
}
