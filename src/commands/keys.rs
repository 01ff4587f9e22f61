//! Key export and static keyfile commands

use crate::cli::ExportFormat;
use std::fs;
use std::path::Path;
use tagflasher_core::config::ProvisionConfig;
use tagflasher_core::error::KeyError;
use tagflasher_core::keys::export::{
    device_catalog_json, records_json, render_keys_listing, render_table,
};
use tagflasher_core::keys::{KeySchedule, KeyScheduleEntry, Seed, SEED_LEN};
use tagflasher_session::secrets::generate_keyfile;

/// Read a seed from a file holding either 32 raw bytes or hex text
pub fn read_seed_file(path: &Path) -> Result<Seed, Box<dyn std::error::Error>> {
    let data = fs::read(path)?;
    if data.len() == SEED_LEN {
        return Ok(Seed::from_slice(&data)?);
    }
    let len = data.len();
    let text = String::from_utf8(data).map_err(|_| KeyError::InvalidSeed(len))?;
    Ok(Seed::from_hex(&text)?)
}

/// Seed from the command line or a seed file
pub fn load_seed(
    seed: Option<&str>,
    seed_file: Option<&Path>,
) -> Result<Seed, Box<dyn std::error::Error>> {
    match (seed, seed_file) {
        (Some(hex), _) => Ok(Seed::from_hex(hex)?),
        (None, Some(path)) => read_seed_file(path),
        (None, None) => Err("either --seed or --seed-file is required".into()),
    }
}

/// Render `entries` in the requested format
pub fn render(
    entries: &[KeyScheduleEntry],
    format: ExportFormat,
    device_name: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ExportFormat::Table => render_table(entries),
        ExportFormat::Json => records_json(entries)?,
        ExportFormat::Catalog => device_catalog_json(device_name, entries)?,
        ExportFormat::Keys => render_keys_listing(entries),
    })
}

/// Run the keys export command
pub fn cmd_export(
    config: &ProvisionConfig,
    seed: Seed,
    hours: u32,
    offset_hours: i64,
    format: ExportFormat,
    device_name: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = KeySchedule::new(seed, config.keys.rotation_secs);
    let start = schedule.counter_for_offset(offset_hours);
    let count = schedule.intervals_for_hours(hours);
    log::info!(
        "Exporting {} keys from counter {} ({}s rotation)",
        count,
        start,
        schedule.rotation_secs()
    );

    let entries = schedule.entries(start, count)?;
    let text = render(&entries, format, device_name)?;

    match output {
        Some(path) => {
            fs::write(path, &text)?;
            println!("Wrote {} keys to {}", entries.len(), path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Run the keys static command
pub fn cmd_static(
    config: &ProvisionConfig,
    device_name: &str,
    count: Option<usize>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = count.unwrap_or(config.keys.static_count);
    let dir = output.unwrap_or(config.paths.keys.as_path());
    let keyfile = generate_keyfile(device_name, count, dir)?;
    println!(
        "Wrote {} keys for {} to {}",
        keyfile.len(),
        device_name,
        dir.display()
    );
    Ok(())
}
