//! Intel HEX and flat binary conversion

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tagflasher_core::error::BuildError;
use tagflasher_flash::runner::{CommandRunner, CommandSpec};

/// Converts firmware images between Intel HEX and flat binary
pub trait FormatConverter: Send + Sync {
    /// Flatten a HEX image
    fn hex_to_bin(&self, src: &Path, dst: &Path) -> Result<(), BuildError>;

    /// Wrap a flat image as HEX, loading it at `offset`
    fn bin_to_hex(&self, src: &Path, dst: &Path, offset: u32) -> Result<(), BuildError>;
}

/// Converts with `objcopy`
pub struct ObjcopyConverter {
    program: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl ObjcopyConverter {
    /// Create a converter running `program`
    pub fn new(program: impl Into<String>, timeout: Duration, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            timeout,
            runner,
        }
    }

    fn run(&self, spec: CommandSpec) -> Result<(), BuildError> {
        let out = self.runner.run(&spec).map_err(|e| BuildError::ToolUnavailable {
            tool: self.program.clone(),
            reason: e.to_string(),
        })?;
        if !out.success() {
            return Err(BuildError::ToolFailed {
                tool: self.program.clone(),
                code: out.code,
                output: out.tail(5),
            });
        }
        Ok(())
    }
}

impl FormatConverter for ObjcopyConverter {
    fn hex_to_bin(&self, src: &Path, dst: &Path) -> Result<(), BuildError> {
        let spec = CommandSpec::new(&self.program, self.timeout)
            .args(["-I", "ihex", "-O", "binary"])
            .arg(src.to_string_lossy())
            .arg(dst.to_string_lossy());
        self.run(spec)
    }

    fn bin_to_hex(&self, src: &Path, dst: &Path, offset: u32) -> Result<(), BuildError> {
        let spec = CommandSpec::new(&self.program, self.timeout)
            .args(["-I", "binary", "-O", "ihex", "--change-addresses"])
            .arg(format!("0x{:X}", offset))
            .arg(src.to_string_lossy())
            .arg(dst.to_string_lossy());
        self.run(spec)
    }
}
