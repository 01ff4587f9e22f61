//! Patch command implementation

use crate::cli::MarkerKind;
use crate::commands::keys::read_seed_file;
use std::fs;
use std::path::Path;
use tagflasher_core::keys::Keyfile;
use tagflasher_core::patch::{FirmwareImage, KEY_MARKER, SEED_MARKER};

/// Marker and payload for a secret file
pub fn secret_payload(
    marker: MarkerKind,
    secret: &Path,
) -> Result<(&'static [u8], Vec<u8>), Box<dyn std::error::Error>> {
    Ok(match marker {
        MarkerKind::Seed => (&SEED_MARKER[..], read_seed_file(secret)?.as_bytes().to_vec()),
        MarkerKind::Key => (&KEY_MARKER[..], Keyfile::parse(&fs::read(secret)?)?.key_payload()),
    })
}

/// Run the patch command
pub fn run(
    input: &Path,
    output: &Path,
    marker: MarkerKind,
    secret: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (marker_bytes, payload) = secret_payload(marker, secret)?;

    let mut image = FirmwareImage::load(input)?;
    let offset = image.patch_marker(marker_bytes, &payload)?;
    image.save(output)?;

    println!(
        "Patched {} bytes at offset 0x{:X}, wrote {:?}",
        payload.len(),
        offset,
        output
    );
    Ok(())
}
