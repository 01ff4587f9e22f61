//! Provisioning session pipeline
//!
//! A session checks the hardware, then for each device: names it, prepares
//! its secret, builds the firmware under the shared build lock, patches the
//! secret into a private copy of the image and flashes it. Sessions run on
//! their own thread and report progress through a [`SessionHandle`].

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use uuid::Uuid;

use tagflasher_core::chip::{ChipCatalog, ChipProfile};
use tagflasher_core::config::ProvisionConfig;
use tagflasher_core::error::{ConfigError, HardwareError};
use tagflasher_core::patch::FirmwareImage;
use tagflasher_core::{Error, Result};
use tagflasher_flash::{
    candidate_families, detect_debugger, identify_chip, CommandRunner, Confidence, DebuggerBackend,
    DetectedDebugger, FlashJob, Identification, ProcessRunner, ProgrammerOrchestrator,
};

use crate::builder::{BuildFlags, FirmwareBuilder, MakeBuilder};
use crate::converter::{FormatConverter, ObjcopyConverter};
use crate::naming::{advertising_interval, device_name};
use crate::secrets::{prepare_secret, KeyMode};
use crate::workspace::{BuildWorkspace, SessionDir};

/// Log lines kept in a session's status
const STATUS_LOG_LINES: usize = 200;

/// Finds the attached debug probe
pub trait DebuggerDetector: Send + Sync {
    /// The attached probe, if any
    fn detect(&self) -> Option<DetectedDebugger>;
}

/// Detects probes by USB enumeration
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbDetector;

impl DebuggerDetector for UsbDetector {
    fn detect(&self) -> Option<DetectedDebugger> {
        detect_debugger()
    }
}

/// Everything sessions share
pub struct ProvisioningContext {
    /// Loaded configuration
    pub config: ProvisionConfig,
    /// Chip catalog
    pub catalog: ChipCatalog,
    /// Session directories and the build lock
    pub workspace: Arc<BuildWorkspace>,
    /// Runs the flashing tools
    pub runner: Arc<dyn CommandRunner>,
    /// Firmware builder
    pub builder: Arc<dyn FirmwareBuilder>,
    /// HEX/BIN converter
    pub converter: Arc<dyn FormatConverter>,
    /// Probe detection
    pub detector: Arc<dyn DebuggerDetector>,
}

impl ProvisioningContext {
    /// Wire the external tools from `config`, running them as child processes
    pub fn new(config: ProvisionConfig, catalog: ChipCatalog) -> Self {
        Self::with_runner(config, catalog, Arc::new(ProcessRunner))
    }

    /// Wire the external tools from `config` on top of `runner`
    pub fn with_runner(
        config: ProvisionConfig,
        catalog: ChipCatalog,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let builder = MakeBuilder::new(
            &config.tools.make,
            &config.firmware.project_root,
            Duration::from_secs(config.timeouts.build),
            runner.clone(),
        );
        let converter = ObjcopyConverter::new(
            &config.tools.objcopy,
            Duration::from_secs(config.timeouts.convert),
            runner.clone(),
        );
        Self {
            workspace: Arc::new(BuildWorkspace::new(&config.paths.workspace)),
            builder: Arc::new(builder),
            converter: Arc::new(converter),
            detector: Arc::new(UsbDetector),
            runner,
            config,
            catalog,
        }
    }
}

/// What a session should provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    /// Chip name or legacy id
    pub chip: String,
    /// Device name prefix
    pub prefix: String,
    /// First device number
    pub start_number: u32,
    /// Key mode
    pub mode: KeyMode,
    /// Backend to use; detected over USB when `None`
    pub backend: Option<DebuggerBackend>,
    /// Keep flashing boards until stopped
    pub auto_flash: bool,
    /// Program the SoftDevice too
    pub flash_softdevice: bool,
    /// Board has a DC/DC converter
    pub has_dcdc: bool,
}

impl ProvisioningRequest {
    /// A single-device dynamic-mode request with auto-detected backend
    pub fn new(chip: impl Into<String>, prefix: impl Into<String>, start_number: u32) -> Self {
        Self {
            chip: chip.into(),
            prefix: prefix.into(),
            start_number,
            mode: KeyMode::Dynamic,
            backend: None,
            auto_flash: false,
            flash_softdevice: true,
            has_dcdc: false,
        }
    }
}

/// Where a session is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Not started
    Idle,
    /// Detecting the probe and identifying the chip
    CheckingHardware,
    /// Preparing the device secret
    GeneratingKeys,
    /// Building firmware, possibly waiting for the build lock
    Building,
    /// Converting and patching the image
    Patching,
    /// Programming the board
    Flashing,
    /// Auto-flash: waiting for a board to connect
    WaitingForBoard,
    /// Auto-flash: waiting for the flashed board to be removed
    WaitingForRemoval,
    /// Finished successfully
    Completed,
    /// Ended on request
    Stopped,
    /// Ended with an error
    Failed,
}

impl ProgressState {
    /// Whether the session has ended
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressState::Completed | ProgressState::Stopped | ProgressState::Failed
        )
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressState::Idle => "idle",
            ProgressState::CheckingHardware => "checking hardware",
            ProgressState::GeneratingKeys => "generating keys",
            ProgressState::Building => "building firmware",
            ProgressState::Patching => "patching firmware",
            ProgressState::Flashing => "flashing",
            ProgressState::WaitingForBoard => "waiting for board",
            ProgressState::WaitingForRemoval => "waiting for board removal",
            ProgressState::Completed => "completed",
            ProgressState::Stopped => "stopped",
            ProgressState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a session's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Pipeline state
    pub state: ProgressState,
    /// Device currently being provisioned
    pub device_name: Option<String>,
    /// Devices flashed so far, in order
    pub flashed: Vec<String>,
    /// Most recent log lines
    pub log: Vec<String>,
    /// Error that ended the session
    pub error: Option<String>,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            state: ProgressState::Idle,
            device_name: None,
            flashed: Vec::new(),
            log: Vec::new(),
            error: None,
        }
    }

    /// Number of devices flashed
    pub fn flashed_count(&self) -> usize {
        self.flashed.len()
    }
}

/// Outcome of a session that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Devices flashed, in order
    pub flashed: Vec<String>,
    /// Whether the session ended on a stop request
    pub stopped: bool,
}

/// One provisioning run
pub struct ProvisioningSession {
    id: Uuid,
    ctx: Arc<ProvisioningContext>,
    request: ProvisioningRequest,
    status: Arc<Mutex<SessionStatus>>,
    stop: Arc<AtomicBool>,
}

impl ProvisioningSession {
    /// Create a session
    pub fn new(ctx: Arc<ProvisioningContext>, request: ProvisioningRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            request,
            status: Arc::new(Mutex::new(SessionStatus::new())),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned stop flag
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The request being served
    pub fn request(&self) -> &ProvisioningRequest {
        &self.request
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        lock(&self.status).clone()
    }

    /// Ask the session to stop at the next phase boundary
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run the session on a named worker thread
    pub fn spawn(self) -> io::Result<SessionHandle> {
        let id = self.id;
        let status = self.status.clone();
        let stop = self.stop.clone();
        let name = format!("session-{}", &id.simple().to_string()[..8]);
        let thread = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(SessionHandle {
            id,
            status,
            stop,
            thread,
        })
    }

    /// Run the session on the calling thread
    pub fn run(&self) -> Result<SessionSummary> {
        let result = self.execute();
        let flashed = self.status().flashed;
        match result {
            Ok(()) => {
                self.set_state(ProgressState::Completed);
                self.note(format!("Session complete, {} device(s) flashed", flashed.len()));
                Ok(SessionSummary {
                    flashed,
                    stopped: false,
                })
            }
            Err(Error::Stopped) => {
                self.set_state(ProgressState::Stopped);
                self.note(format!("Stopped after {} device(s)", flashed.len()));
                Ok(SessionSummary {
                    flashed,
                    stopped: true,
                })
            }
            Err(e) => {
                log::error!("Session {} failed: {}", self.id, e);
                {
                    let mut status = lock(&self.status);
                    status.error = Some(e.to_string());
                    status.state = ProgressState::Failed;
                }
                Err(e)
            }
        }
    }

    fn execute(&self) -> Result<()> {
        let chip = self.validate()?;
        let dir = self.ctx.workspace.session_dir(self.id)?;
        self.check_stop()?;

        self.set_state(ProgressState::CheckingHardware);
        let orchestrator = self.orchestrator()?;

        if self.request.auto_flash {
            return self.auto_flash(&chip, &orchestrator, &dir);
        }

        self.identify(&orchestrator, &chip, &dir)?;
        self.check_stop()?;
        let name = self.prepare_image(&chip, self.request.start_number, &dir)?;
        self.check_stop()?;
        self.flash_image(&orchestrator, &chip, &name, &dir)
    }

    /// Resolve the chip and check everything that needs no hardware
    fn validate(&self) -> Result<ChipProfile> {
        let chip = self.ctx.catalog.resolve(&self.request.chip)?.clone();
        if !chip.is_buildable() {
            return Err(ConfigError::InvalidValue {
                field: "chip",
                reason: format!("{} has no firmware build target", chip.name),
            }
            .into());
        }
        if let Some(sd) = self.softdevice_path(&chip) {
            if !sd.is_file() {
                return Err(ConfigError::InvalidValue {
                    field: "softdevice_image",
                    reason: format!("{} not found", sd.display()),
                }
                .into());
            }
        }
        Ok(chip)
    }

    fn softdevice_path(&self, chip: &ChipProfile) -> Option<PathBuf> {
        self.request
            .flash_softdevice
            .then(|| self.ctx.config.firmware.project_root.join(&chip.softdevice_image))
    }

    fn orchestrator(&self) -> Result<ProgrammerOrchestrator> {
        let backend = match &self.request.backend {
            Some(backend) => backend.clone(),
            None => {
                let detected = self
                    .ctx
                    .detector
                    .detect()
                    .ok_or(HardwareError::DebuggerMissing)?;
                self.note(format!("Detected {}", detected));
                detected.into()
            }
        };
        self.note(format!("Using backend {}", backend));
        Ok(ProgrammerOrchestrator::for_backend(
            &backend,
            &self.ctx.config.tools,
            &self.ctx.config.timeouts,
            self.ctx.runner.clone(),
        ))
    }

    /// Identify the attached chip, refusing a chip other than the requested one
    pub(crate) fn identify(
        &self,
        orchestrator: &ProgrammerOrchestrator,
        chip: &ChipProfile,
        dir: &SessionDir,
    ) -> Result<Identification> {
        let identification = identify_chip(
            orchestrator,
            &self.ctx.catalog,
            &candidate_families(chip),
            chip,
            self.ctx.config.timeouts.identify(),
            Some(dir.path()),
        )?;
        match identification.confidence {
            Confidence::Confirmed if identification.chip.name != chip.name => {
                return Err(ConfigError::InvalidValue {
                    field: "chip",
                    reason: format!(
                        "{} requested but {} is attached",
                        chip.name, identification.chip.name
                    ),
                }
                .into());
            }
            Confidence::Confirmed => self.note(format!("Target is {}", identification.chip.name)),
            Confidence::Degraded => {
                self.note(format!("Target not identified, assuming {}", chip.name))
            }
        }
        Ok(identification)
    }

    /// Name, key, build and patch the image for device `number`.
    ///
    /// Returns the device name; the image is left at the session's
    /// patched HEX path.
    pub(crate) fn prepare_image(
        &self,
        chip: &ChipProfile,
        number: u32,
        dir: &SessionDir,
    ) -> Result<String> {
        let config = &self.ctx.config;
        let name = device_name(&self.request.prefix, number, config.firmware.name_width);
        lock(&self.status).device_name = Some(name.clone());
        self.note(format!("Provisioning {}", name));

        self.set_state(ProgressState::GeneratingKeys);
        let secret = prepare_secret(self.request.mode, &name, &config.keys, &config.paths)?;
        let flags = BuildFlags {
            has_dcdc: self.request.has_dcdc,
            rotation_secs: config.keys.rotation_secs,
            advertising_interval_ms: advertising_interval(
                config.firmware.advertising_base_ms,
                config.firmware.advertising_step_ms,
                number,
            ),
            keys: secret.build_keys,
        };

        self.set_state(ProgressState::Building);
        {
            let _guard = self.ctx.workspace.lock_build();
            let hex = self.ctx.builder.build(chip, &flags)?;
            fs::copy(&hex, dir.firmware_hex())?;
        }

        self.set_state(ProgressState::Patching);
        let converter = &self.ctx.converter;
        converter.hex_to_bin(&dir.firmware_hex(), &dir.firmware_bin())?;
        let mut image = FirmwareImage::load(&dir.firmware_bin())?;
        let offset = image.patch_marker(secret.marker, &secret.payload)?;
        self.note(format!(
            "Patched {} {} bytes at 0x{:X}",
            self.request.mode,
            secret.payload.len(),
            offset
        ));
        image.save(&dir.patched_bin())?;
        converter.bin_to_hex(&dir.patched_bin(), &dir.patched_hex(), chip.flash_offset)?;
        Ok(name)
    }

    /// Program the prepared image
    pub(crate) fn flash_image(
        &self,
        orchestrator: &ProgrammerOrchestrator,
        chip: &ChipProfile,
        name: &str,
        dir: &SessionDir,
    ) -> Result<()> {
        self.set_state(ProgressState::Flashing);
        let application = dir.patched_hex();
        let softdevice = self.softdevice_path(chip);
        let job = FlashJob::program(chip, &application, softdevice.as_deref())
            .with_scratch_dir(dir.path());
        let report = orchestrator.flash(&job)?;
        self.note(format!("{} flashed via {}", name, report.backend));
        lock(&self.status).flashed.push(name.to_string());
        Ok(())
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn check_stop(&self) -> Result<()> {
        if self.stop_requested() {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    pub(crate) fn context(&self) -> &ProvisioningContext {
        &self.ctx
    }

    pub(crate) fn set_state(&self, state: ProgressState) {
        log::debug!("Session {}: {}", self.id, state);
        lock(&self.status).state = state;
    }

    /// Log a line and keep it in the session status
    pub(crate) fn note(&self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}", line);
        let mut status = lock(&self.status);
        if status.log.len() == STATUS_LOG_LINES {
            status.log.remove(0);
        }
        status.log.push(line);
    }
}

/// Handle to a session running on its own thread
pub struct SessionHandle {
    id: Uuid,
    status: Arc<Mutex<SessionStatus>>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<SessionSummary>>,
}

impl SessionHandle {
    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        lock(&self.status).clone()
    }

    /// Ask the session to stop at the next phase boundary
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session to end
    pub fn join(self) -> Result<SessionSummary> {
        self.thread
            .join()
            .map_err(|_| Error::Io(io::Error::other("session thread panicked")))?
    }
}

fn lock(status: &Mutex<SessionStatus>) -> MutexGuard<'_, SessionStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Rig};
    use tagflasher_core::error::BuildError;
    use tagflasher_core::keys::KEY_LEN;
    use tagflasher_core::patch::{KEY_MARKER, SEED_MARKER};

    #[test]
    fn test_single_dynamic_flash() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "msf", 7));
        let summary = session.run().unwrap();

        assert_eq!(summary.flashed, vec!["MSF007"]);
        assert!(!summary.stopped);
        let status = session.status();
        assert_eq!(status.state, ProgressState::Completed);
        assert_eq!(status.device_name.as_deref(), Some("MSF007"));

        let seed = fs::read(rig.root().join("seeds/MSF007/seed_MSF007.bin")).unwrap();
        let images = rig.programmed();
        assert_eq!(images.len(), 1);
        let offset = testing::SEED_OFFSET;
        assert_eq!(&images[0][offset..offset + seed.len()], seed.as_slice());
        assert!(!images[0].windows(SEED_MARKER.len()).any(|w| w == SEED_MARKER));

        let chip = rig.catalog().resolve("nRF52832").unwrap().clone();
        assert_eq!(rig.converter.offsets(), vec![chip.flash_offset]);
        let flags = rig.builder.flags();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].advertising_interval_ms, 1070);

        // session directory is cleaned up
        let leftover = fs::read_dir(rig.root().join("work")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_static_mode_patches_key_table() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let mut request = rig.request("nRF52832", "STC", 1);
        request.mode = KeyMode::Static;
        let session = ProvisioningSession::new(rig.context(), request);
        session.run().unwrap();

        let keyfile = fs::read(rig.root().join("keys/STC001_keyfile")).unwrap();
        let payload = &keyfile[1..];
        assert_eq!(payload.len(), 3 * KEY_LEN);
        let image = &rig.programmed()[0];
        let offset = testing::KEY_OFFSET;
        assert_eq!(&image[offset..offset + payload.len()], payload);
        assert!(!image.windows(KEY_MARKER.len()).any(|w| w == KEY_MARKER));
        assert_eq!(
            rig.builder.flags()[0].keys,
            crate::builder::BuildKeys::Static { count: 3 }
        );
    }

    #[test]
    fn test_missing_debugger_aborts_before_build() {
        let rig = Rig::new(testing::board_answering(0x52832)).without_debugger();
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 1));
        let err = session.run().unwrap_err();
        assert!(matches!(err, Error::Hardware(HardwareError::DebuggerMissing)));
        assert!(rig.builder.flags().is_empty());
        assert_eq!(session.status().state, ProgressState::Failed);
        assert!(session.status().error.is_some());
    }

    #[test]
    fn test_chip_mismatch_aborts_before_build() {
        let rig = Rig::new(testing::board_answering(0x52810));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 1));
        let err = session.run().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidValue { field: "chip", .. })
        ));
        assert!(rig.builder.flags().is_empty());
        assert!(rig.programmed().is_empty());
    }

    #[test]
    fn test_unknown_and_flash_only_chips() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF9160", "TAG", 1));
        assert!(matches!(
            session.run().unwrap_err(),
            Error::Config(ConfigError::UnknownChip(_))
        ));

        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52811", "TAG", 1));
        assert!(matches!(
            session.run().unwrap_err(),
            Error::Config(ConfigError::InvalidValue { field: "chip", .. })
        ));
        assert!(rig.runner.calls().is_empty());
    }

    #[test]
    fn test_missing_softdevice_is_config_error() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let mut request = rig.request("nRF52832", "TAG", 1);
        request.flash_softdevice = true;
        let session = ProvisioningSession::new(rig.context(), request);
        assert!(matches!(
            session.run().unwrap_err(),
            Error::Config(ConfigError::InvalidValue {
                field: "softdevice_image",
                ..
            })
        ));
    }

    #[test]
    fn test_build_failure_skips_flash() {
        let rig = Rig::new(testing::board_answering(0x52832)).with_failing_build();
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 1));
        let err = session.run().unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::ToolFailed { .. })));
        assert!(rig.programmed().is_empty());
    }

    #[test]
    fn test_stop_before_start() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 1));
        session.request_stop();
        let summary = session.run().unwrap();
        assert!(summary.stopped);
        assert!(summary.flashed.is_empty());
        assert!(rig.runner.calls().is_empty());
        assert_eq!(session.status().state, ProgressState::Stopped);
    }

    #[test]
    fn test_spawned_session_reports_through_handle() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 42));
        let handle = session.spawn().unwrap();
        let summary = handle.join().unwrap();
        assert_eq!(summary.flashed, vec!["TAG042"]);
    }

    #[test]
    fn test_status_log_is_bounded() {
        let rig = Rig::new(testing::board_answering(0x52832));
        let session = ProvisioningSession::new(rig.context(), rig.request("nRF52832", "TAG", 1));
        for i in 0..(STATUS_LOG_LINES + 10) {
            session.note(format!("line {}", i));
        }
        let log = session.status().log;
        assert_eq!(log.len(), STATUS_LOG_LINES);
        assert_eq!(log[0], "line 10");
    }
}
