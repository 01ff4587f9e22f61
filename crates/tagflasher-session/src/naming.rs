//! Device naming and per-device build parameters

/// Build a device name from a prefix and a sequence number.
///
/// The prefix is uppercased and the number zero-padded so the name is
/// `width` characters long, with at least one digit.
pub fn device_name(prefix: &str, number: u32, width: usize) -> String {
    let prefix = prefix.to_uppercase();
    let digits = width.saturating_sub(prefix.chars().count()).max(1);
    format!("{}{:0digits$}", prefix, number, digits = digits)
}

/// Advertising interval for a device number, in milliseconds
pub fn advertising_interval(base_ms: u32, step_ms: u32, number: u32) -> u32 {
    base_ms.saturating_add(step_ms.saturating_mul(number))
}
