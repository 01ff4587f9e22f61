//! Target chip identification
//!
//! Each candidate family's hardware-info register is read in turn. The
//! first value the catalog recognizes decides the chip. If nothing is
//! recognized, a plain connect against the configured chip still lets the
//! session continue, with degraded confidence.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tagflasher_core::chip::{ChipCatalog, ChipFamily, ChipProfile};
use tagflasher_core::error::HardwareError;

use crate::classifier::FailureKind;
use crate::orchestrator::ProgrammerOrchestrator;

/// How sure identification is about the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// A hardware id matched the catalog
    Confirmed,
    /// Only a connect succeeded; the configured chip is assumed
    Degraded,
}

/// Why a family's register read did not identify the chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnidentifiedReason {
    /// No answer from the target
    NotResponding,
    /// Debug access is locked
    ReadProtected,
    /// The read did not finish in time
    Timeout,
    /// A value was read but matches no catalog entry
    UnknownHardwareId(u32),
}

impl fmt::Display for UnidentifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnidentifiedReason::NotResponding => f.write_str("not responding"),
            UnidentifiedReason::ReadProtected => f.write_str("read-back protected"),
            UnidentifiedReason::Timeout => f.write_str("timed out"),
            UnidentifiedReason::UnknownHardwareId(id) => {
                write!(f, "unknown hardware id 0x{:08X}", id)
            }
        }
    }
}

/// Identification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Identified (or assumed) chip
    pub chip: ChipProfile,
    /// Confidence level
    pub confidence: Confidence,
    /// Raw info register value, when one was read
    pub hardware_id: Option<u32>,
}

/// Families to try, the configured chip's family first
pub fn candidate_families(configured: &ChipProfile) -> Vec<ChipFamily> {
    let mut families = vec![configured.family];
    for family in [ChipFamily::Nrf52, ChipFamily::Nrf51] {
        if !families.contains(&family) {
            families.push(family);
        }
    }
    families
}

/// Identify the attached chip
pub fn identify_chip(
    orchestrator: &ProgrammerOrchestrator,
    catalog: &ChipCatalog,
    families: &[ChipFamily],
    configured: &ChipProfile,
    read_timeout: Duration,
    scratch: Option<&Path>,
) -> Result<Identification, HardwareError> {
    let mut reasons = Vec::new();

    for &family in families {
        let Some(representative) = catalog.by_family(family).next() else {
            continue;
        };
        let addr = family.info_register();
        match orchestrator.read_word(representative, addr, read_timeout) {
            Ok(raw) => {
                if let Some(chip) = catalog.find_by_hardware_id(family, raw) {
                    log::info!("Identified {} (hardware id 0x{:08X})", chip.name, raw);
                    return Ok(Identification {
                        chip: chip.clone(),
                        confidence: Confidence::Confirmed,
                        hardware_id: Some(raw),
                    });
                }
                log::debug!("{}: unrecognized hardware id 0x{:08X}", family, raw);
                reasons.push(UnidentifiedReason::UnknownHardwareId(raw));
            }
            Err(failure) => {
                let reason = match failure.kind {
                    FailureKind::Protected => UnidentifiedReason::ReadProtected,
                    FailureKind::Timeout => UnidentifiedReason::Timeout,
                    FailureKind::Connection | FailureKind::Other => UnidentifiedReason::NotResponding,
                };
                log::debug!("{}: {} ({})", family, reason, failure.detail);
                reasons.push(reason);
            }
        }
    }

    log::warn!(
        "Chip not identified, checking connectivity to {}",
        configured.name
    );
    match orchestrator.probe(configured, scratch, read_timeout) {
        Ok(()) => {
            log::warn!("Assuming {} (identification degraded)", configured.name);
            Ok(Identification {
                chip: configured.clone(),
                confidence: Confidence::Degraded,
                hardware_id: None,
            })
        }
        Err(failure) => {
            let protected = failure.kind == FailureKind::Protected
                || reasons.contains(&UnidentifiedReason::ReadProtected);
            if protected {
                Err(HardwareError::ChipProtected(failure.detail))
            } else {
                Err(HardwareError::ChipDisconnected(failure.detail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::{DebuggerBackend, STLINK_INTERFACE};
    use crate::runner::{CommandOutput, ScriptedRunner};
    use std::sync::Arc;
    use tagflasher_core::config::{Timeouts, ToolPaths};

    fn setup(
        handler: impl Fn(&crate::runner::CommandSpec) -> Result<CommandOutput, crate::runner::RunError>
            + Send
            + Sync
            + 'static,
    ) -> (ProgrammerOrchestrator, Arc<ScriptedRunner>, ChipCatalog) {
        let runner = Arc::new(ScriptedRunner::new(handler));
        let orch = ProgrammerOrchestrator::for_backend(
            &DebuggerBackend::OpenOcd(STLINK_INTERFACE.into()),
            &ToolPaths::default(),
            &Timeouts::default(),
            runner.clone(),
        );
        (orch, runner, ChipCatalog::builtin().unwrap())
    }

    #[test]
    fn test_candidate_order() {
        let catalog = ChipCatalog::builtin().unwrap();
        assert_eq!(
            candidate_families(catalog.resolve("nRF51822").unwrap()),
            vec![ChipFamily::Nrf51, ChipFamily::Nrf52]
        );
        assert_eq!(
            candidate_families(catalog.resolve("nRF52810").unwrap()),
            vec![ChipFamily::Nrf52, ChipFamily::Nrf51]
        );
    }

    #[test]
    fn test_identifies_nrf52() {
        let (orch, _, catalog) = setup(|spec| {
            let cmds = spec.args.last().cloned().unwrap_or_default();
            if cmds.contains("mdw 0x10000100") {
                Ok(CommandOutput::ok("0x10000100: 00052810 \n"))
            } else {
                Ok(CommandOutput::failed(1, "Error: no device found"))
            }
        });
        let configured = catalog.resolve("nRF52832").unwrap();
        let id = identify_chip(
            &orch,
            &catalog,
            &candidate_families(configured),
            configured,
            Duration::from_secs(3),
            None,
        )
        .unwrap();
        assert_eq!(id.chip.name, "nRF52810");
        assert_eq!(id.confidence, Confidence::Confirmed);
        assert_eq!(id.hardware_id, Some(0x52810));
    }

    #[test]
    fn test_nrf51_after_nrf52_miss() {
        let (orch, runner, catalog) = setup(|spec| {
            let cmds = spec.args.last().cloned().unwrap_or_default();
            if cmds.contains("mdw 0x1000005C") {
                Ok(CommandOutput::ok("0x1000005c: 00000072 \n"))
            } else {
                Ok(CommandOutput::failed(1, "Error: timed out while waiting for target halted"))
            }
        });
        let configured = catalog.resolve("nRF52832").unwrap();
        let id = identify_chip(
            &orch,
            &catalog,
            &candidate_families(configured),
            configured,
            Duration::from_secs(3),
            None,
        )
        .unwrap();
        assert_eq!(id.chip.name, "nRF51822");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_degraded_when_only_connect_works() {
        let (orch, _, catalog) = setup(|spec| {
            let cmds = spec.args.last().cloned().unwrap_or_default();
            if cmds == "init; exit" {
                Ok(CommandOutput::ok(""))
            } else {
                Ok(CommandOutput::ok("garbage"))
            }
        });
        let configured = catalog.resolve("nRF52832").unwrap();
        let id = identify_chip(
            &orch,
            &catalog,
            &candidate_families(configured),
            configured,
            Duration::from_secs(3),
            None,
        )
        .unwrap();
        assert_eq!(id.chip.name, "nRF52832");
        assert_eq!(id.confidence, Confidence::Degraded);
        assert_eq!(id.hardware_id, None);
    }

    #[test]
    fn test_protected_and_disconnected() {
        let (orch, _, catalog) = setup(|_| {
            Ok(CommandOutput::failed(1, "Error: Device is protected (APPROTECT)"))
        });
        let configured = catalog.resolve("nRF52832").unwrap();
        let err = identify_chip(&orch, &catalog, &[ChipFamily::Nrf52], configured, Duration::from_secs(3), None)
            .unwrap_err();
        assert!(matches!(err, HardwareError::ChipProtected(_)));

        let (orch, _, catalog) = setup(|_| Ok(CommandOutput::failed(1, "Error: open failed")));
        let err = identify_chip(&orch, &catalog, &[ChipFamily::Nrf52], configured, Duration::from_secs(3), None)
            .unwrap_err();
        assert!(matches!(err, HardwareError::ChipDisconnected(_)));
    }
}
