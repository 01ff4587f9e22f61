//! Backend selection and fallback
//!
//! A [`ProgrammerOrchestrator`] owns an ordered list of strategies built
//! from the session's [`DebuggerBackend`]. A mutating job is tried on each
//! strategy that supports it until one succeeds, so the native vendor path
//! falls back to the console exactly once and OpenOCD gets a single try.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tagflasher_core::chip::ChipProfile;
use tagflasher_core::config::{ToolPaths, Timeouts};
use tagflasher_core::error::FlashError;

use crate::backend::{
    AttemptFailure, AttemptReport, ConsoleStrategy, FlashJob, FlashStrategy, NativeToolStrategy,
    OpenOcdStrategy,
};
use crate::classifier::FailureKind;
use crate::debugger::DebuggerBackend;
use crate::runner::CommandRunner;

/// Runs flash jobs against an ordered strategy list
pub struct ProgrammerOrchestrator {
    runner: Arc<dyn CommandRunner>,
    strategies: Vec<Box<dyn FlashStrategy>>,
}

impl ProgrammerOrchestrator {
    /// Build the strategy list for `backend`
    pub fn for_backend(
        backend: &DebuggerBackend,
        tools: &ToolPaths,
        timeouts: &Timeouts,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let console = || {
            Box::new(ConsoleStrategy::new(&tools.console, timeouts.flash())) as Box<dyn FlashStrategy>
        };
        let strategies: Vec<Box<dyn FlashStrategy>> = match backend {
            DebuggerBackend::NativeVendorProbe => vec![
                Box::new(NativeToolStrategy::new(
                    &tools.native,
                    Duration::from_secs(timeouts.native_step),
                    Duration::from_secs(timeouts.native_reset),
                )),
                console(),
            ],
            DebuggerBackend::ScriptedDebugConsole => vec![console()],
            DebuggerBackend::OpenOcd(interface) => vec![Box::new(OpenOcdStrategy::new(
                &tools.openocd,
                interface.as_str(),
                tools.openocd_scripts.clone(),
                timeouts.flash(),
            ))],
        };
        Self::with_strategies(strategies, runner)
    }

    /// Use an explicit strategy list
    pub fn with_strategies(
        strategies: Vec<Box<dyn FlashStrategy>>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self { runner, strategies }
    }

    /// Names of the strategies, in order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run `job` on each supporting strategy until one succeeds.
    ///
    /// Returns every attempt's report, the last one deciding the outcome.
    pub fn run(&self, job: &FlashJob<'_>) -> Vec<AttemptReport> {
        let mut reports: Vec<AttemptReport> = Vec::new();
        for strategy in self.strategies.iter().filter(|s| s.supports(job)) {
            if let Some(previous) = reports.last() {
                log::warn!(
                    "{} failed, falling back to {}",
                    previous.backend,
                    strategy.name()
                );
            }
            let report = strategy.attempt(self.runner.as_ref(), job);
            match &report.failure {
                None => log::info!("{}: {} complete", strategy.name(), job.chip.name),
                Some(f) => log::warn!("{}: failed during {}: {}", strategy.name(), report.stage, f.detail),
            }
            let done = report.succeeded();
            reports.push(report);
            if done {
                break;
            }
        }
        reports
    }

    /// Program the target, reporting a single error if every backend fails
    pub fn flash(&self, job: &FlashJob<'_>) -> Result<AttemptReport, FlashError> {
        let mut reports = self.run(job);
        let last = reports.pop().ok_or_else(|| FlashError::BackendFailed {
            backend: "none".into(),
            stage: "idle".into(),
            detail: "no backend supports this job".into(),
        })?;
        if let Some(failure) = &last.failure {
            return Err(flash_error(&last, failure));
        }
        Ok(last)
    }

    /// Connect to the target without touching flash
    pub fn probe(
        &self,
        chip: &ChipProfile,
        scratch: Option<&Path>,
        timeout: Duration,
    ) -> Result<(), AttemptFailure> {
        let mut job = FlashJob::probe(chip).with_timeout(timeout);
        job.scratch_dir = scratch;
        let last = self.run(&job).pop().ok_or_else(|| AttemptFailure {
            kind: FailureKind::Other,
            detail: "no backend can probe".into(),
            timed_out: None,
        })?;
        match last.failure {
            None => Ok(()),
            Some(failure) => Err(failure),
        }
    }

    /// Backend whose result decides a probe of `chip`
    pub fn probe_backend(&self, chip: &ChipProfile) -> &'static str {
        let job = FlashJob::probe(chip);
        self.strategies
            .iter()
            .rev()
            .find(|s| s.supports(&job))
            .map_or("none", |s| s.name())
    }

    /// Read a 32-bit word through the first backend that can read memory
    pub fn read_word(
        &self,
        chip: &ChipProfile,
        addr: u32,
        timeout: Duration,
    ) -> Result<u32, AttemptFailure> {
        self.strategies
            .iter()
            .find_map(|s| s.read_word(self.runner.as_ref(), chip, addr, timeout))
            .unwrap_or_else(|| {
                Err(AttemptFailure {
                    kind: FailureKind::Other,
                    detail: "no backend can read target memory".into(),
                    timed_out: None,
                })
            })
    }
}

fn flash_error(report: &AttemptReport, failure: &AttemptFailure) -> FlashError {
    match failure.timed_out {
        Some(timeout) => FlashError::Timeout {
            backend: report.backend.to_string(),
            stage: report.stage.to_string(),
            seconds: timeout.as_secs(),
        },
        None => FlashError::BackendFailed {
            backend: report.backend.to_string(),
            stage: report.stage.to_string(),
            detail: failure.detail.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AttemptStage;
    use crate::debugger::STLINK_INTERFACE;
    use crate::runner::{CommandOutput, RunError, ScriptedRunner};
    use tagflasher_core::chip::ChipCatalog;

    fn chip() -> ChipProfile {
        ChipCatalog::builtin().unwrap().resolve("nRF52832").unwrap().clone()
    }

    fn orchestrator(backend: DebuggerBackend, runner: Arc<ScriptedRunner>) -> ProgrammerOrchestrator {
        ProgrammerOrchestrator::for_backend(
            &backend,
            &ToolPaths::default(),
            &Timeouts::default(),
            runner,
        )
    }

    #[test]
    fn test_strategy_lists() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(CommandOutput::ok(""))));
        assert_eq!(
            orchestrator(DebuggerBackend::NativeVendorProbe, runner.clone()).strategy_names(),
            vec!["nrfjprog", "JLinkExe"]
        );
        assert_eq!(
            orchestrator(DebuggerBackend::ScriptedDebugConsole, runner.clone()).strategy_names(),
            vec!["JLinkExe"]
        );
        assert_eq!(
            orchestrator(DebuggerBackend::OpenOcd(STLINK_INTERFACE.into()), runner).strategy_names(),
            vec!["openocd"]
        );
    }

    #[test]
    fn test_native_success_skips_console() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(CommandOutput::ok(""))));
        let orch = orchestrator(DebuggerBackend::NativeVendorProbe, runner.clone());
        let chip = chip();
        let report = orch
            .flash(&FlashJob::program(&chip, Path::new("app.hex"), None))
            .unwrap();
        assert_eq!(report.backend, "nrfjprog");
        assert_eq!(report.stage, AttemptStage::Done);
        assert_eq!(runner.count("JLinkExe"), 0);
    }

    #[test]
    fn test_native_failure_falls_back_once() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.program == "nrfjprog" {
                Err(RunError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            } else {
                Ok(CommandOutput::ok("O.K."))
            }
        }));
        let orch = orchestrator(DebuggerBackend::NativeVendorProbe, runner.clone());
        let chip = chip();
        let dir = tempfile::tempdir().unwrap();
        let job = FlashJob::program(&chip, Path::new("app.hex"), None).with_scratch_dir(dir.path());
        let report = orch.flash(&job).unwrap();
        assert_eq!(report.backend, "JLinkExe");
        assert_eq!(runner.count("nrfjprog"), 1);
        assert_eq!(runner.count("JLinkExe"), 1);
    }

    #[test]
    fn test_both_backends_fail_with_one_error() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.program == "nrfjprog" {
                Ok(CommandOutput::failed(33, "ERROR: Unable to connect to a debugger."))
            } else {
                Ok(CommandOutput::ok("Cannot connect to target."))
            }
        }));
        let orch = orchestrator(DebuggerBackend::NativeVendorProbe, runner.clone());
        let chip = chip();
        let dir = tempfile::tempdir().unwrap();
        let job = FlashJob::program(&chip, Path::new("app.hex"), Some(Path::new("sd.hex")))
            .with_scratch_dir(dir.path());
        let err = orch.flash(&job).unwrap_err();
        match err {
            FlashError::BackendFailed { backend, stage, detail } => {
                assert_eq!(backend, "JLinkExe");
                assert_eq!(stage, "erase");
                assert_eq!(detail, "Cannot connect to target.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.count("nrfjprog"), 1);
        assert_eq!(runner.count("JLinkExe"), 1);
    }

    #[test]
    fn test_timeout_maps_to_flash_timeout() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            Err(RunError::Timeout {
                program: spec.program.clone(),
                timeout: spec.timeout,
            })
        }));
        let orch = orchestrator(DebuggerBackend::OpenOcd(STLINK_INTERFACE.into()), runner.clone());
        let chip = chip();
        let err = orch
            .flash(&FlashJob::program(&chip, Path::new("app.hex"), None))
            .unwrap_err();
        assert!(matches!(err, FlashError::Timeout { seconds: 20, .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_probe_skips_native_tool() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(CommandOutput::ok("O.K."))));
        let orch = orchestrator(DebuggerBackend::NativeVendorProbe, runner.clone());
        let dir = tempfile::tempdir().unwrap();
        orch.probe(&chip(), Some(dir.path()), Duration::from_secs(8)).unwrap();
        assert_eq!(orch.probe_backend(&chip()), "JLinkExe");
        assert_eq!(runner.calls()[0].timeout, Duration::from_secs(8));
        assert_eq!(runner.count("nrfjprog"), 0);
        assert_eq!(runner.count("JLinkExe"), 1);
    }

    #[test]
    fn test_read_word_uses_memory_capable_backend() {
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            assert_eq!(spec.program, "openocd");
            assert!(spec.args.last().unwrap().contains("mdw 0x10000100"));
            Ok(CommandOutput::ok("0x10000100: 00052832 \n"))
        }));
        let orch = orchestrator(DebuggerBackend::OpenOcd(STLINK_INTERFACE.into()), runner);
        let value = orch
            .read_word(&chip(), 0x10000100, Duration::from_secs(3))
            .unwrap();
        assert_eq!(value, 0x52832);
    }
}
