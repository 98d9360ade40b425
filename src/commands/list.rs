//! List commands implementation

use crate::programmers;
use rupdi_core::chip::ChipDatabase;

/// List all supported programmers and any connected EDBG probes
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for p in programmers::available_programmers() {
        let aliases = if p.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", p.aliases.join(", "))
        };
        let debug = if p.debug { "program, debug" } else { "program" };
        println!("  {:8} - {} [{}]{}", p.name, p.description, debug, aliases);
    }

    #[cfg(feature = "edbg")]
    {
        println!();
        match rupdi_edbg::list_probes(rupdi_core::probe::KNOWN_PROBES) {
            Ok(probes) if probes.is_empty() => println!("No EDBG probes connected"),
            Ok(probes) => {
                println!("Connected EDBG probes:");
                for (index, probe) in probes.iter().enumerate() {
                    println!("  index={}: {}", index, probe);
                }
            }
            Err(e) => log::warn!("Could not enumerate USB devices: {}", e),
        }
    }
}

/// List all known chips
pub fn list_chips(db: &ChipDatabase, filter: Option<&str>) {
    println!("Supported chips:");
    println!();
    println!(
        "{:<12} {:<12} {:>9} {:>6} {:>7} {:>6}  {}",
        "Family", "Name", "Flash", "Page", "EEPROM", "SRAM", "Signature"
    );
    println!("{}", "-".repeat(70));

    for chip in db.iter() {
        if let Some(filter) = filter {
            if !chip.name.to_lowercase().contains(&filter.to_lowercase()) {
                continue;
            }
        }

        println!(
            "{:<12} {:<12} {:>9} {:>6} {:>7} {:>6}  {:02X} {:02X} {:02X}",
            chip.family,
            chip.name,
            format_size(chip.flash_size),
            chip.flash_page_size,
            format_size(chip.eeprom_size),
            format_size(chip.sram_size),
            chip.signature[0],
            chip.signature[1],
            chip.signature[2]
        );
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
