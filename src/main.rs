//! tagflasher - BLE tracker tag provisioning
//!
//! Builds per-device firmware for nRF51/nRF52 tracker tags, patches each
//! device's secret into the image and flashes it through whichever debug
//! probe is attached.
//!
//! # Architecture
//!
//! - `tagflasher-core` holds the key schedule, firmware patching, the chip
//!   catalog and configuration
//! - `tagflasher-flash` detects probes, identifies chips and drives the
//!   external flashing tools with backend fallback
//! - `tagflasher-session` runs provisioning sessions, one device at a time
//!   or in auto-flash mode

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, KeysCommands};
use std::path::Path;
use tagflasher_core::chip::ChipCatalog;
use tagflasher_core::config::ProvisionConfig;
use tagflasher_session::ProvisioningRequest;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = ProvisionConfig::load(cli.config.as_deref())?;

    let catalog = match load_chip_catalog(cli.chip_db.as_deref()) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("Failed to load chip catalog: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} chip definitions", catalog.len());

    match cli.command {
        Commands::Provision {
            chip,
            prefix,
            start,
            mode,
            backend,
            auto,
            no_softdevice,
            dcdc,
        } => {
            let request = ProvisioningRequest {
                mode,
                backend,
                auto_flash: auto,
                flash_softdevice: config.firmware.flash_softdevice && !no_softdevice,
                has_dcdc: config.firmware.has_dcdc || dcdc,
                ..ProvisioningRequest::new(chip, prefix, start)
            };
            commands::provision::run(config, catalog, request)
        }
        Commands::Flash {
            chip,
            image,
            backend,
            softdevice,
        } => commands::flash::run(&config, &catalog, &chip, &image, backend, softdevice),
        Commands::Detect { chip, backend } => commands::detect::run(&config, &catalog, &chip, backend),
        Commands::Keys(subcmd) => match subcmd {
            KeysCommands::Export {
                seed,
                seed_file,
                hours,
                offset,
                format,
                name,
                output,
            } => {
                let seed = commands::keys::load_seed(seed.as_deref(), seed_file.as_deref())?;
                commands::keys::cmd_export(
                    &config,
                    seed,
                    hours,
                    offset,
                    format,
                    &name,
                    output.as_deref(),
                )
            }
            KeysCommands::Static {
                name,
                count,
                output,
            } => commands::keys::cmd_static(&config, &name, count, output.as_deref()),
        },
        Commands::Patch {
            input,
            output,
            marker,
            secret,
        } => commands::patch::run(&input, &output, marker, &secret),
        Commands::ListChips { family } => {
            commands::list_chips(&catalog, family.as_deref());
            Ok(())
        }
    }
}

/// Load the built-in chip catalog, then any overrides from `path`
fn load_chip_catalog(path: Option<&Path>) -> Result<ChipCatalog, Box<dyn std::error::Error>> {
    let mut catalog = ChipCatalog::builtin()?;

    if let Some(path) = path {
        let count = if path.is_dir() {
            catalog.load_dir(path)?
        } else if path.is_file() {
            catalog.load_file(path)?
        } else {
            return Err(format!("Chip catalog path not found: {}", path.display()).into());
        };
        log::debug!("Loaded {} chips from {}", count, path.display());
    }

    Ok(catalog)
}
