//! Fakes for session tests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use tagflasher_core::chip::{ChipCatalog, ChipProfile};
use tagflasher_core::config::{
    AutoFlashSettings, FirmwareSettings, KeySettings, OutputPaths, ProvisionConfig,
};
use tagflasher_core::error::BuildError;
use tagflasher_core::patch::{KEY_MARKER, SEED_MARKER};
use tagflasher_core::Result;
use tagflasher_flash::runner::{CommandOutput, RunError, ScriptedRunner};
use tagflasher_flash::{DetectedDebugger, OpenOcdProbe};

use crate::builder::{BuildFlags, FirmwareBuilder};
use crate::controller::{DebuggerDetector, ProvisioningContext, ProvisioningRequest};
use crate::converter::FormatConverter;
use crate::workspace::BuildWorkspace;

/// Offset of the seed placeholder in the fake firmware
pub(crate) const SEED_OFFSET: usize = 64;
/// Offset of the key table placeholder in the fake firmware
pub(crate) const KEY_OFFSET: usize = SEED_OFFSET + 64;

fn fake_firmware() -> Vec<u8> {
    let mut image = vec![0xFF; SEED_OFFSET];
    image.extend_from_slice(SEED_MARKER);
    image.resize(KEY_OFFSET, 0xFF);
    image.extend_from_slice(KEY_MARKER);
    image.resize(KEY_OFFSET + 8 * KEY_MARKER.len(), 0xFF);
    image
}

/// Builder that writes a fixed image and records the flags it was given
pub(crate) struct FakeBuilder {
    out_dir: PathBuf,
    fail: bool,
    flags: Mutex<Vec<BuildFlags>>,
}

impl FakeBuilder {
    pub(crate) fn flags(&self) -> Vec<BuildFlags> {
        self.flags.lock().unwrap().clone()
    }
}

impl FirmwareBuilder for FakeBuilder {
    fn build(&self, chip: &ChipProfile, flags: &BuildFlags) -> Result<PathBuf> {
        self.flags.lock().unwrap().push(flags.clone());
        if self.fail {
            return Err(BuildError::ToolFailed {
                tool: "make".into(),
                code: Some(2),
                output: "error: boom".into(),
            }
            .into());
        }
        fs::create_dir_all(&self.out_dir)?;
        let path = self
            .out_dir
            .join(format!("{}.hex", chip.build_target.clone().unwrap()));
        fs::write(&path, fake_firmware())?;
        Ok(path)
    }
}

/// Converter that copies bytes and records load offsets
#[derive(Default)]
pub(crate) struct CopyConverter {
    offsets: Mutex<Vec<u32>>,
}

impl CopyConverter {
    pub(crate) fn offsets(&self) -> Vec<u32> {
        self.offsets.lock().unwrap().clone()
    }
}

impl FormatConverter for CopyConverter {
    fn hex_to_bin(&self, src: &Path, dst: &Path) -> std::result::Result<(), BuildError> {
        fs::copy(src, dst).map_err(|e| BuildError::ToolUnavailable {
            tool: "copy".into(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn bin_to_hex(&self, src: &Path, dst: &Path, offset: u32) -> std::result::Result<(), BuildError> {
        self.offsets.lock().unwrap().push(offset);
        self.hex_to_bin(src, dst)
    }
}

struct FixedDetector(Option<DetectedDebugger>);

impl DebuggerDetector for FixedDetector {
    fn detect(&self) -> Option<DetectedDebugger> {
        self.0
    }
}

type ProbeReply = std::result::Result<CommandOutput, RunError>;
type ProbeFn = dyn Fn(usize) -> ProbeReply + Send + Sync;

/// Behavior of the simulated target board
pub(crate) struct Board {
    hardware_id: u32,
    probe: Box<ProbeFn>,
    flash_ok: bool,
}

/// A board that always answers with `hardware_id`
pub(crate) fn board_answering(hardware_id: u32) -> Board {
    Board {
        hardware_id,
        probe: Box::new(|_| Ok(CommandOutput::ok(""))),
        flash_ok: true,
    }
}

impl Board {
    /// Decide each probe by its zero-based call index
    pub(crate) fn with_probe(self, probe: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
        self.with_probe_reply(move |n| {
            Ok(if probe(n) {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed(1, "Error: open failed")
            })
        })
    }

    /// Answer each probe with the runner result for its call index
    pub(crate) fn with_probe_reply(
        mut self,
        reply: impl Fn(usize) -> ProbeReply + Send + Sync + 'static,
    ) -> Self {
        self.probe = Box::new(reply);
        self
    }

    /// Make every programming attempt fail after connecting
    pub(crate) fn failing_flash(mut self) -> Self {
        self.flash_ok = false;
        self
    }
}

/// A temporary directory with fake tools wired into a context
pub(crate) struct Rig {
    dir: TempDir,
    catalog: ChipCatalog,
    pub(crate) runner: Arc<ScriptedRunner>,
    pub(crate) builder: Arc<FakeBuilder>,
    pub(crate) converter: Arc<CopyConverter>,
    detected: Option<DetectedDebugger>,
    programmed: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Rig {
    pub(crate) fn new(board: Board) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let programmed: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
        let probes = AtomicUsize::new(0);
        let images = programmed.clone();

        let runner = Arc::new(ScriptedRunner::new(move |spec| {
            let cmds = spec.args.last().cloned().unwrap_or_default();
            if cmds == "init; exit" {
                let n = probes.fetch_add(1, Ordering::SeqCst);
                return (board.probe)(n);
            }
            if let Some(rest) = cmds.strip_prefix("init; mdw ") {
                let addr = rest.trim_end_matches("; exit");
                return Ok(CommandOutput::ok(format!("{}: {:08x} \n", addr, board.hardware_id)));
            }
            if !board.flash_ok {
                return Ok(CommandOutput::failed(1, "Error: failed erasing sectors"));
            }
            for cmd in cmds.split("; ") {
                if let Some(path) = cmd.strip_prefix("program ") {
                    let path = path.trim_end_matches(" verify");
                    images.lock().unwrap().push(fs::read(path).unwrap());
                }
            }
            Ok(CommandOutput::ok("** Programming Finished **"))
        }));

        let out_dir = dir.path().join("build");
        Self {
            dir,
            catalog: ChipCatalog::builtin().unwrap(),
            runner,
            builder: Arc::new(FakeBuilder {
                out_dir,
                fail: false,
                flags: Mutex::new(Vec::new()),
            }),
            converter: Arc::new(CopyConverter::default()),
            detected: Some(DetectedDebugger::OpenOcdCompatible(OpenOcdProbe::StLink)),
            programmed,
        }
    }

    pub(crate) fn without_debugger(mut self) -> Self {
        self.detected = None;
        self
    }

    pub(crate) fn with_failing_build(mut self) -> Self {
        self.builder = Arc::new(FakeBuilder {
            out_dir: self.dir.path().join("build"),
            fail: true,
            flags: Mutex::new(Vec::new()),
        });
        self
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn catalog(&self) -> &ChipCatalog {
        &self.catalog
    }

    /// Images handed to the programmer, in order
    pub(crate) fn programmed(&self) -> Vec<Vec<u8>> {
        self.programmed.lock().unwrap().clone()
    }

    pub(crate) fn config(&self) -> ProvisionConfig {
        let root = self.root();
        ProvisionConfig {
            keys: KeySettings {
                offline_count: 5,
                static_count: 3,
                ..KeySettings::default()
            },
            firmware: FirmwareSettings {
                project_root: root.to_path_buf(),
                advertising_step_ms: 10,
                ..FirmwareSettings::default()
            },
            paths: OutputPaths {
                workspace: root.join("work"),
                seeds: root.join("seeds"),
                keys: root.join("keys"),
            },
            autoflash: AutoFlashSettings {
                debounce_ms: 0,
                removal_poll_ms: 0,
            },
            ..ProvisionConfig::default()
        }
    }

    pub(crate) fn context(&self) -> Arc<ProvisioningContext> {
        let config = self.config();
        Arc::new(ProvisioningContext {
            workspace: Arc::new(BuildWorkspace::new(&config.paths.workspace)),
            config,
            catalog: self.catalog.clone(),
            runner: self.runner.clone(),
            builder: self.builder.clone(),
            converter: self.converter.clone(),
            detector: Arc::new(FixedDetector(self.detected)),
        })
    }

    /// A single-device request without SoftDevice
    pub(crate) fn request(&self, chip: &str, prefix: &str, start: u32) -> ProvisioningRequest {
        ProvisioningRequest {
            flash_softdevice: false,
            ..ProvisioningRequest::new(chip, prefix, start)
        }
    }
}
