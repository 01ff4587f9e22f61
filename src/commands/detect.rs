//! Detect command implementation

use std::sync::Arc;
use tagflasher_core::chip::ChipCatalog;
use tagflasher_core::config::ProvisionConfig;
use tagflasher_core::error::HardwareError;
use tagflasher_flash::{
    candidate_families, detect_debugger, identify_chip, Confidence, DebuggerBackend, ProcessRunner,
    ProgrammerOrchestrator,
};

/// Use `backend`, or detect one over USB when it is `None`
pub fn resolve_backend(
    backend: Option<DebuggerBackend>,
) -> Result<DebuggerBackend, HardwareError> {
    match backend {
        Some(backend) => Ok(backend),
        None => {
            let detected = detect_debugger().ok_or(HardwareError::DebuggerMissing)?;
            println!("Debugger:     {}", detected);
            Ok(detected.into())
        }
    }
}

/// Detect the probe and identify the attached chip
pub fn run(
    config: &ProvisionConfig,
    catalog: &ChipCatalog,
    chip: &str,
    backend: Option<DebuggerBackend>,
) -> Result<(), Box<dyn std::error::Error>> {
    let expected = catalog.resolve(chip)?;

    let backend = resolve_backend(backend)?;
    println!("Backend:      {}", backend);

    let orchestrator = ProgrammerOrchestrator::for_backend(
        &backend,
        &config.tools,
        &config.timeouts,
        Arc::new(ProcessRunner),
    );
    let id = identify_chip(
        &orchestrator,
        catalog,
        &candidate_families(expected),
        expected,
        config.timeouts.identify(),
        None,
    )?;

    println!();
    println!("Chip Information");
    println!("================");
    println!("Name:         {}", id.chip.name);
    println!("Family:       {}", id.chip.family);
    match id.hardware_id {
        Some(raw) => println!("Hardware id:  0x{:08X}", raw),
        None => println!("Hardware id:  (not read)"),
    }
    println!(
        "Confidence:   {}",
        match id.confidence {
            Confidence::Confirmed => "confirmed",
            Confidence::Degraded => "degraded (connect only)",
        }
    );
    println!("App offset:   0x{:05X}", id.chip.flash_offset);
    println!(
        "Buildable:    {}",
        if id.chip.is_buildable() { "yes" } else { "no (flash only)" }
    );

    Ok(())
}
