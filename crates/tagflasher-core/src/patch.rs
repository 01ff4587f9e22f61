//! Firmware image patching
//!
//! The tag firmware reserves space for its secret behind a fixed ASCII
//! marker. Provisioning finds the marker in the flat binary image and
//! overwrites it in place.

use std::fs;
use std::path::Path;

use crate::error::{Error, PatchError};

/// Marker reserving room for the 32-byte dynamic-mode seed
pub const SEED_MARKER: &[u8; 32] = b"LinkyTagDynamicSeedPlaceholder!!";

/// Marker preceding the static-mode public key table
pub const KEY_MARKER: &[u8; 28] = b"OFFLINEFINDINGPUBLICKEYHERE!";

/// Return the offset of the first occurrence of `marker`.
///
/// Additional occurrences are logged and ignored.
pub fn locate_placeholder(image: &[u8], marker: &[u8]) -> Result<usize, PatchError> {
    let not_found = || PatchError::PlaceholderNotFound {
        marker: String::from_utf8_lossy(marker).into_owned(),
    };
    if marker.is_empty() || marker.len() > image.len() {
        return Err(not_found());
    }

    let mut hits = image
        .windows(marker.len())
        .enumerate()
        .filter(|(_, w)| *w == marker)
        .map(|(i, _)| i);

    let first = hits.next().ok_or_else(not_found)?;
    let extra = hits.count();
    if extra > 0 {
        log::warn!(
            "Marker {:?} occurs {} times, patching first at 0x{:X}",
            String::from_utf8_lossy(marker),
            extra + 1,
            first
        );
    }
    Ok(first)
}

/// Overwrite `secret.len()` bytes of `image` at `offset`
pub fn patch(image: &mut [u8], offset: usize, secret: &[u8]) -> Result<(), PatchError> {
    let end = offset
        .checked_add(secret.len())
        .filter(|&end| end <= image.len())
        .ok_or(PatchError::SecretOutOfBounds {
            offset,
            len: secret.len(),
            image_len: image.len(),
        })?;
    image[offset..end].copy_from_slice(secret);
    Ok(())
}

/// A flat firmware binary held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap image bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Read a binary image from disk
    pub fn load(path: &Path) -> Result<Self, Error> {
        Ok(Self::new(fs::read(path)?))
    }

    /// Write the image to disk
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    /// Locate `marker` and overwrite it with `secret`, returning the offset
    pub fn patch_marker(&mut self, marker: &[u8], secret: &[u8]) -> Result<usize, PatchError> {
        let offset = locate_placeholder(&self.data, marker)?;
        patch(&mut self.data, offset, secret)?;
        log::debug!(
            "Patched {} bytes at offset 0x{:X}",
            secret.len(),
            offset
        );
        Ok(offset)
    }

    /// Image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
