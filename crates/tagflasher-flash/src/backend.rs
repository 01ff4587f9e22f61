//! Flashing backends
//!
//! Each backend is a [`FlashStrategy`] that drives one external tool. A
//! strategy never decides about retries; it reports how far its attempt
//! got and how it failed, and the orchestrator chooses what to do next.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tagflasher_core::chip::{ChipFamily, ChipProfile};

use crate::classifier::{
    failure_kind, Classified, ConsoleClassifier, ExitCodeClassifier, FailureKind,
    OutputClassifier,
};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunError};

/// Stages of one flash attempt, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttemptStage {
    /// Nothing started
    Idle,
    /// Connect and disconnect without touching flash
    ProbeOnly,
    /// Mass erase before programming the SoftDevice
    Erase,
    /// Program the SoftDevice image
    ProgramSoftDevice,
    /// Program the application image
    ProgramApplication,
    /// Verify the application
    Verify,
    /// Reset and start the target
    Reset,
    /// Attempt finished successfully
    Done,
}

impl AttemptStage {
    /// The stages an attempt for `job` walks through
    pub fn plan(job: &FlashJob<'_>) -> Vec<AttemptStage> {
        if job.probe_only {
            return vec![AttemptStage::ProbeOnly];
        }
        let mut stages = Vec::with_capacity(5);
        if job.softdevice.is_some() {
            stages.push(AttemptStage::Erase);
            stages.push(AttemptStage::ProgramSoftDevice);
        }
        stages.extend([
            AttemptStage::ProgramApplication,
            AttemptStage::Verify,
            AttemptStage::Reset,
        ]);
        stages
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStage::Idle => "idle",
            AttemptStage::ProbeOnly => "probe",
            AttemptStage::Erase => "erase",
            AttemptStage::ProgramSoftDevice => "program softdevice",
            AttemptStage::ProgramApplication => "program application",
            AttemptStage::Verify => "verify",
            AttemptStage::Reset => "reset",
            AttemptStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// What to do in one attempt
#[derive(Debug, Clone, Copy)]
pub struct FlashJob<'a> {
    /// Target chip
    pub chip: &'a ChipProfile,
    /// Application HEX image; `None` for probe-only jobs
    pub application: Option<&'a Path>,
    /// SoftDevice HEX image to program first, with a mass erase
    pub softdevice: Option<&'a Path>,
    /// Only check that the target answers
    pub probe_only: bool,
    /// Directory for temporary scripts
    pub scratch_dir: Option<&'a Path>,
    /// Replaces the backend's own attempt timeout
    pub timeout: Option<Duration>,
}

impl<'a> FlashJob<'a> {
    /// A connect-only job
    pub fn probe(chip: &'a ChipProfile) -> Self {
        Self {
            chip,
            application: None,
            softdevice: None,
            probe_only: true,
            scratch_dir: None,
            timeout: None,
        }
    }

    /// A programming job
    pub fn program(chip: &'a ChipProfile, application: &'a Path, softdevice: Option<&'a Path>) -> Self {
        Self {
            chip,
            application: Some(application),
            softdevice,
            probe_only: false,
            scratch_dir: None,
            timeout: None,
        }
    }

    /// Write temporary files into `dir`
    pub fn with_scratch_dir(mut self, dir: &'a Path) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    /// Bound the attempt by `timeout` instead of the backend default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn stage_from_output(&self, output: &str, kind: FailureKind) -> AttemptStage {
        let plan = AttemptStage::plan(self);
        if kind == FailureKind::Connection || kind == FailureKind::Protected {
            return plan[0];
        }
        let mentions = |p: Option<&Path>| {
            p.and_then(Path::file_name)
                .and_then(|n| n.to_str())
                .is_some_and(|n| output.contains(n))
        };
        if mentions(self.application) {
            AttemptStage::ProgramApplication
        } else if mentions(self.softdevice) {
            AttemptStage::ProgramSoftDevice
        } else {
            plan[0]
        }
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Category
    pub kind: FailureKind,
    /// Explanation
    pub detail: String,
    /// Timeout that elapsed, if the attempt timed out
    pub timed_out: Option<Duration>,
}

impl AttemptFailure {
    fn from_run_error(err: RunError) -> Self {
        match err {
            RunError::Timeout { timeout, .. } => Self {
                kind: FailureKind::Timeout,
                detail: err.to_string(),
                timed_out: Some(timeout),
            },
            RunError::Spawn { .. } | RunError::Runtime(_) => Self {
                kind: FailureKind::Other,
                detail: err.to_string(),
                timed_out: None,
            },
        }
    }
}

impl From<Classified> for AttemptFailure {
    fn from(c: Classified) -> Self {
        Self {
            kind: c.kind,
            detail: c.detail,
            timed_out: None,
        }
    }
}

/// Outcome of one attempt by one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    /// Backend name
    pub backend: &'static str,
    /// Last stage reached
    pub stage: AttemptStage,
    /// `None` on success
    pub failure: Option<AttemptFailure>,
}

impl AttemptReport {
    fn done(backend: &'static str) -> Self {
        Self {
            backend,
            stage: AttemptStage::Done,
            failure: None,
        }
    }

    fn failed(backend: &'static str, stage: AttemptStage, failure: AttemptFailure) -> Self {
        Self {
            backend,
            stage,
            failure: Some(failure),
        }
    }

    /// Whether the attempt succeeded
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// One way of programming a target
pub trait FlashStrategy: Send + Sync {
    /// Short backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Whether this backend can run `job`
    fn supports(&self, job: &FlashJob<'_>) -> bool;

    /// Run one attempt
    fn attempt(&self, runner: &dyn CommandRunner, job: &FlashJob<'_>) -> AttemptReport;

    /// Read one 32-bit word of target memory, if the backend can
    fn read_word(
        &self,
        _runner: &dyn CommandRunner,
        _chip: &ChipProfile,
        _addr: u32,
        _timeout: Duration,
    ) -> Option<Result<u32, AttemptFailure>> {
        None
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Native vendor tool
// ============================================================================

/// Programs through the vendor's command-line tool, step by step
#[derive(Debug, Clone)]
pub struct NativeToolStrategy {
    program: String,
    step_timeout: Duration,
    reset_timeout: Duration,
}

impl NativeToolStrategy {
    /// Create the strategy for the given executable
    pub fn new(program: impl Into<String>, step_timeout: Duration, reset_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            step_timeout,
            reset_timeout,
        }
    }

    fn base(&self, family: ChipFamily, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.program, timeout).args(["-f", family.native_tool_family()])
    }

    /// Commands for `job`, each with the stage it completes
    pub fn commands(&self, job: &FlashJob<'_>) -> Vec<(AttemptStage, CommandSpec)> {
        let family = job.chip.family;
        let mut steps = Vec::new();
        if let Some(sd) = job.softdevice {
            steps.push((
                AttemptStage::ProgramSoftDevice,
                self.base(family, self.step_timeout)
                    .args(["--program".to_string(), path_arg(sd), "--chiperase".to_string()]),
            ));
        }
        if let Some(app) = job.application {
            steps.push((
                AttemptStage::Verify,
                self.base(family, self.step_timeout).args([
                    "--program".to_string(),
                    path_arg(app),
                    "--sectorerase".to_string(),
                    "--verify".to_string(),
                ]),
            ));
        }
        steps.push((
            AttemptStage::Reset,
            self.base(family, self.reset_timeout).arg("--reset"),
        ));
        steps
    }
}

impl FlashStrategy for NativeToolStrategy {
    fn name(&self) -> &'static str {
        "nrfjprog"
    }

    fn supports(&self, job: &FlashJob<'_>) -> bool {
        !job.probe_only
    }

    fn attempt(&self, runner: &dyn CommandRunner, job: &FlashJob<'_>) -> AttemptReport {
        for (stage, spec) in self.commands(job) {
            let in_progress = match stage {
                AttemptStage::ProgramSoftDevice => AttemptStage::Erase,
                AttemptStage::Verify => AttemptStage::ProgramApplication,
                other => other,
            };
            log::debug!("{}: {}", self.name(), in_progress);
            let result = runner
                .run(&spec)
                .map_err(AttemptFailure::from_run_error)
                .and_then(|out| ExitCodeClassifier.classify(&out).map_err(Into::into));
            if let Err(failure) = result {
                return AttemptReport::failed(self.name(), in_progress, failure);
            }
        }
        AttemptReport::done(self.name())
    }
}

// ============================================================================
// Scripted debug console
// ============================================================================

/// Programs by feeding a command script to the debug console
#[derive(Debug, Clone)]
pub struct ConsoleStrategy {
    program: String,
    timeout: Duration,
}

impl ConsoleStrategy {
    /// Create the strategy for the given executable
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// The console script for `job`
    pub fn script(job: &FlashJob<'_>) -> String {
        let mut lines = vec![
            format!("device {}", job.chip.console_device),
            "si SWD".to_string(),
            "speed 4000".to_string(),
            "connect".to_string(),
        ];
        if job.probe_only {
            lines.push("exit".to_string());
            return lines.join("\n") + "\n";
        }

        lines.push("r".to_string());
        lines.push("h".to_string());
        if let Some(sd) = job.softdevice {
            match job.chip.family {
                ChipFamily::Nrf52 => {
                    // NVMC CONFIG = erase enable, ERASEALL, back to read-only
                    lines.push("w4 4001e504 2".to_string());
                    lines.push("w4 4001e50c 1".to_string());
                    lines.push("sleep 100".to_string());
                    lines.push("w4 4001e504 0".to_string());
                    lines.push("r".to_string());
                }
                ChipFamily::Nrf51 => lines.push("erase".to_string()),
            }
            lines.push(format!("loadfile {}", sd.display()));
            lines.push("r".to_string());
        }
        if let Some(app) = job.application {
            lines.push(format!("loadfile {}", app.display()));
        }
        lines.push("r".to_string());
        lines.push("g".to_string());
        lines.push("exit".to_string());
        lines.join("\n") + "\n"
    }

    fn read_script(chip: &ChipProfile, addr: u32) -> String {
        format!(
            "device {}\nsi SWD\nspeed 4000\nconnect\nmem32 {:08X} 1\nexit\n",
            chip.console_device, addr
        )
    }

    fn script_path(scratch: Option<&Path>) -> PathBuf {
        let dir = scratch.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        dir.join(format!("tagflasher-{}.jlink", uuid::Uuid::new_v4()))
    }

    /// Write `script`, run the console on it, and remove the file
    fn run_script(
        &self,
        runner: &dyn CommandRunner,
        script: &str,
        scratch: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, AttemptFailure> {
        let path = Self::script_path(scratch);
        fs::write(&path, script).map_err(|e| AttemptFailure {
            kind: FailureKind::Other,
            detail: format!("cannot write {}: {}", path.display(), e),
            timed_out: None,
        })?;

        let spec = CommandSpec::new(&self.program, timeout)
            .arg("-CommandFile")
            .arg(path_arg(&path));
        let result = runner.run(&spec);

        if let Err(e) = fs::remove_file(&path) {
            log::debug!("Could not remove {}: {}", path.display(), e);
        }
        result.map_err(AttemptFailure::from_run_error)
    }
}

/// Parse `mem32` output such as `10000100 = 00052832`
pub fn parse_mem32(output: &str, addr: u32) -> Option<u32> {
    let prefix = format!("{:08X}", addr);
    output.lines().find_map(|line| {
        let (lhs, rhs) = line.split_once('=')?;
        if !lhs.trim().eq_ignore_ascii_case(&prefix) {
            return None;
        }
        let value = rhs.split_whitespace().next()?;
        u32::from_str_radix(value, 16).ok()
    })
}

impl FlashStrategy for ConsoleStrategy {
    fn name(&self) -> &'static str {
        "JLinkExe"
    }

    fn supports(&self, _job: &FlashJob<'_>) -> bool {
        true
    }

    fn attempt(&self, runner: &dyn CommandRunner, job: &FlashJob<'_>) -> AttemptReport {
        let plan = AttemptStage::plan(job);
        let script = Self::script(job);
        log::debug!("{}: running script for {}", self.name(), job.chip.name);

        let timeout = job.timeout.unwrap_or(self.timeout);
        let out = match self.run_script(runner, &script, job.scratch_dir, timeout) {
            Ok(out) => out,
            Err(failure) => return AttemptReport::failed(self.name(), plan[0], failure),
        };
        match ConsoleClassifier.classify(&out) {
            Ok(()) => AttemptReport::done(self.name()),
            Err(c) => {
                let stage = job.stage_from_output(&out.output, c.kind);
                AttemptReport::failed(self.name(), stage, c.into())
            }
        }
    }

    fn read_word(
        &self,
        runner: &dyn CommandRunner,
        chip: &ChipProfile,
        addr: u32,
        timeout: Duration,
    ) -> Option<Result<u32, AttemptFailure>> {
        let script = Self::read_script(chip, addr);
        let result = self.run_script(runner, &script, None, timeout).and_then(|out| {
            ConsoleClassifier.classify(&out).map_err(AttemptFailure::from)?;
            parse_mem32(&out.output, addr).ok_or_else(|| AttemptFailure {
                kind: failure_kind(&out.output),
                detail: format!("no value for 0x{:08X} in console output", addr),
                timed_out: None,
            })
        });
        Some(result)
    }
}

// ============================================================================
// OpenOCD
// ============================================================================

/// Programs through OpenOCD with a given interface config
#[derive(Debug, Clone)]
pub struct OpenOcdStrategy {
    program: String,
    interface: String,
    scripts_dir: Option<PathBuf>,
    timeout: Duration,
}

impl OpenOcdStrategy {
    /// Create the strategy for the given executable and interface config
    pub fn new(
        program: impl Into<String>,
        interface: impl Into<String>,
        scripts_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            interface: interface.into(),
            scripts_dir,
            timeout,
        }
    }

    /// The `-c` command string for `job`
    pub fn commands(job: &FlashJob<'_>) -> String {
        if job.probe_only {
            return "init; exit".to_string();
        }
        // Every programming job starts from a mass-erased chip
        let mut cmds = vec![
            "init".to_string(),
            "halt".to_string(),
            format!("{} mass_erase", job.chip.family.name()),
        ];
        if let Some(sd) = job.softdevice {
            cmds.push(format!("program {} verify", sd.display()));
        }
        if let Some(app) = job.application {
            cmds.push(format!("program {} verify", app.display()));
        }
        cmds.push("reset".to_string());
        cmds.push("exit".to_string());
        cmds.join("; ")
    }

    fn spec(&self, chip: &ChipProfile, commands: String, timeout: Duration) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program, timeout);
        if let Some(dir) = &self.scripts_dir {
            spec = spec.arg("-s").arg(path_arg(dir));
        }
        spec.args(["-f", self.interface.as_str(), "-f", chip.debug_target_config.as_str()])
            .arg("-c")
            .arg(commands)
    }
}

/// Parse `mdw` output such as `0x10000100: 00052832`
pub fn parse_mdw(output: &str, addr: u32) -> Option<u32> {
    output.lines().find_map(|line| {
        let (lhs, rhs) = line.split_once(':')?;
        let lhs = lhs.trim();
        let hex = lhs.strip_prefix("0x").or_else(|| lhs.strip_prefix("0X"))?;
        if u32::from_str_radix(hex, 16).ok()? != addr {
            return None;
        }
        let value = rhs.split_whitespace().next()?;
        u32::from_str_radix(value, 16).ok()
    })
}

impl FlashStrategy for OpenOcdStrategy {
    fn name(&self) -> &'static str {
        "openocd"
    }

    fn supports(&self, _job: &FlashJob<'_>) -> bool {
        true
    }

    fn attempt(&self, runner: &dyn CommandRunner, job: &FlashJob<'_>) -> AttemptReport {
        let plan = AttemptStage::plan(job);
        let spec = self.spec(job.chip, Self::commands(job), job.timeout.unwrap_or(self.timeout));
        let out = match runner.run(&spec) {
            Ok(out) => out,
            Err(e) => {
                return AttemptReport::failed(self.name(), plan[0], AttemptFailure::from_run_error(e))
            }
        };
        match ExitCodeClassifier.classify(&out) {
            Ok(()) => AttemptReport::done(self.name()),
            Err(c) => {
                let stage = job.stage_from_output(&out.output, c.kind);
                AttemptReport::failed(self.name(), stage, c.into())
            }
        }
    }

    fn read_word(
        &self,
        runner: &dyn CommandRunner,
        chip: &ChipProfile,
        addr: u32,
        timeout: Duration,
    ) -> Option<Result<u32, AttemptFailure>> {
        let cmds = format!("init; mdw 0x{:08X}; exit", addr);
        let spec = self.spec(chip, cmds, timeout);
        let result = runner
            .run(&spec)
            .map_err(AttemptFailure::from_run_error)
            .and_then(|out| {
                ExitCodeClassifier.classify(&out).map_err(AttemptFailure::from)?;
                parse_mdw(&out.output, addr).ok_or_else(|| AttemptFailure {
                    kind: failure_kind(&out.output),
                    detail: format!("no value for 0x{:08X} in openocd output", addr),
                    timed_out: None,
                })
            });
        Some(result)
    }
}
