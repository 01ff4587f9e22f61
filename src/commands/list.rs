//! List command implementation

use tagflasher_core::chip::ChipCatalog;

/// List all supported chips
pub fn list_chips(catalog: &ChipCatalog, family_filter: Option<&str>) {
    println!("Supported chips:");
    println!();
    println!(
        "{:<4} {:<12} {:<8} {:>12} {:<24}",
        "Id", "Name", "Family", "App offset", "Build target"
    );
    println!("{}", "-".repeat(64));

    for chip in catalog.chips() {
        // Apply family filter if specified
        if let Some(family) = family_filter {
            if !chip.family.name().eq_ignore_ascii_case(family) {
                continue;
            }
        }

        println!(
            "{:<4} {:<12} {:<8} {:>12} {:<24}",
            chip.legacy_id.as_deref().unwrap_or("-"),
            chip.name,
            chip.family.name(),
            format!("0x{:05X}", chip.flash_offset),
            chip.build_target.as_deref().unwrap_or("(flash only)")
        );
    }
}
