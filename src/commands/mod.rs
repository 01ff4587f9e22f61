//! CLI command implementations
//!
//! ## Provisioning
//!
//! `provision` runs a session on a worker thread and shows its progress
//! with a spinner. Ctrl-C requests a stop; the session finishes the step
//! in flight before ending.
//!
//! `flash` programs a prebuilt image and `detect` reports the attached
//! probe and chip.
//!
//! ## Offline tools
//!
//! `keys`, `patch` and `list` need no hardware.

pub mod detect;
pub mod flash;
pub mod keys;
mod list;
pub mod patch;
pub mod provision;

pub use list::list_chips;
