//! tagflasher-core - Core library for BLE tag provisioning
//!
//! This crate holds everything in the provisioning pipeline that does not
//! touch hardware or spawn processes:
//!
//! - [`keys`] - the rotating key schedule derived from a per-device seed,
//!   static keyfiles, and the export formats consumed by query tooling
//! - [`chip`] - the catalog of supported target chips
//! - [`patch`] - locating placeholder markers in compiled firmware and
//!   writing secret material over them
//! - [`config`] - provisioning configuration loaded from TOML
//!
//! # Example
//!
//! ```ignore
//! use tagflasher_core::keys::{KeySchedule, Seed};
//!
//! let schedule = KeySchedule::new(Seed::generate(), 900);
//! for entry in schedule.entries(0, schedule.intervals_for_hours(24))? {
//!     println!("{} {}", entry.counter, hex::encode(entry.public_x));
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chip;
pub mod config;
pub mod error;
pub mod keys;
pub mod patch;

pub use error::{Error, Result};
