//! tagflasher-flash - Hardware access through external debug tools
//!
//! This crate detects attached debug probes, identifies the target chip and
//! programs firmware by driving vendor and open-source tools as child
//! processes.
//!
//! # Backends
//!
//! | Backend | Tool | Fallback |
//! |---------|------|----------|
//! | Native vendor probe | `nrfjprog` | scripted console |
//! | Scripted debug console | `JLinkExe` | none |
//! | Generic debug bridge | `openocd` | none |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tagflasher_flash::{detect_debugger, DebuggerBackend, ProcessRunner, ProgrammerOrchestrator};
//!
//! let backend: DebuggerBackend = detect_debugger().ok_or("no probe")?.into();
//! let orch = ProgrammerOrchestrator::for_backend(&backend, &tools, &timeouts, Arc::new(ProcessRunner));
//! orch.flash(&FlashJob::program(&chip, &app_hex, Some(&softdevice)))?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod classifier;
pub mod debugger;
pub mod identify;
pub mod orchestrator;
pub mod runner;

pub use backend::{AttemptFailure, AttemptReport, AttemptStage, FlashJob, FlashStrategy};
pub use classifier::{FailureKind, OutputClassifier};
pub use debugger::{detect_debugger, DebuggerBackend, DetectedDebugger, OpenOcdProbe, UsbError};
pub use identify::{candidate_families, identify_chip, Confidence, Identification};
pub use orchestrator::ProgrammerOrchestrator;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, RunError};
