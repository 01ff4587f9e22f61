//! Flash command implementation
//!
//! Programs an image that was built elsewhere. Nothing is built or patched,
//! so this also serves chips without a firmware project.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tagflasher_core::chip::{ChipCatalog, ChipProfile};
use tagflasher_core::config::ProvisionConfig;
use tagflasher_core::error::ConfigError;
use tagflasher_flash::{
    AttemptReport, CommandRunner, DebuggerBackend, FlashJob, ProcessRunner, ProgrammerOrchestrator,
};

use crate::commands::detect::resolve_backend;

/// SoftDevice image for `chip`, checked to exist
fn softdevice_for(config: &ProvisionConfig, chip: &ChipProfile) -> Result<PathBuf, ConfigError> {
    let path = config.firmware.project_root.join(&chip.softdevice_image);
    if !path.is_file() {
        return Err(ConfigError::InvalidValue {
            field: "softdevice_image",
            reason: format!("{} not found", path.display()),
        });
    }
    Ok(path)
}

/// Program `image` onto `chip` through `backend`
pub fn flash_prebuilt(
    config: &ProvisionConfig,
    chip: &ChipProfile,
    image: &Path,
    backend: &DebuggerBackend,
    with_softdevice: bool,
    runner: Arc<dyn CommandRunner>,
) -> Result<AttemptReport, Box<dyn std::error::Error>> {
    if !image.is_file() {
        return Err(ConfigError::InvalidValue {
            field: "image",
            reason: format!("{} not found", image.display()),
        }
        .into());
    }
    let softdevice = if with_softdevice {
        Some(softdevice_for(config, chip)?)
    } else {
        None
    };

    let orchestrator =
        ProgrammerOrchestrator::for_backend(backend, &config.tools, &config.timeouts, runner);
    let job = FlashJob::program(chip, image, softdevice.as_deref());
    Ok(orchestrator.flash(&job)?)
}

/// Run the flash command
pub fn run(
    config: &ProvisionConfig,
    catalog: &ChipCatalog,
    chip: &str,
    image: &Path,
    backend: Option<DebuggerBackend>,
    with_softdevice: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let chip = catalog.resolve(chip)?;
    let backend = resolve_backend(backend)?;
    log::info!("Flashing {} onto {} via {}", image.display(), chip.name, backend);

    let report = flash_prebuilt(
        config,
        chip,
        image,
        &backend,
        with_softdevice,
        Arc::new(ProcessRunner),
    )?;
    println!("Flashed {} via {}", chip.name, report.backend);
    Ok(())
}
