//! tagflasher-session - Provisioning sessions
//!
//! A [`ProvisioningSession`] turns a [`ProvisioningRequest`] into flashed
//! devices: it checks the attached hardware, derives per-device names and
//! secrets, builds and patches the firmware, and hands the image to the
//! programmer. In auto-flash mode it repeats this for every board that is
//! connected until it is told to stop.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tagflasher_session::{ProvisioningContext, ProvisioningRequest, ProvisioningSession};
//!
//! let ctx = Arc::new(ProvisioningContext::new(config, catalog));
//! let handle = ProvisioningSession::new(ctx, ProvisioningRequest::new("nRF52832", "MSF", 7)).spawn()?;
//! let summary = handle.join()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod autoflash;
pub mod builder;
pub mod controller;
pub mod converter;
pub mod naming;
pub mod secrets;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use builder::{BuildFlags, BuildKeys, FirmwareBuilder, MakeBuilder};
pub use controller::{
    DebuggerDetector, ProgressState, ProvisioningContext, ProvisioningRequest, ProvisioningSession,
    SessionHandle, SessionStatus, SessionSummary, UsbDetector,
};
pub use converter::{FormatConverter, ObjcopyConverter};
pub use naming::{advertising_interval, device_name};
pub use secrets::{DeviceSecret, KeyMode};
pub use workspace::{BuildWorkspace, SessionDir};
