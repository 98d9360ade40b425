//! Target identification

use rupdi_core::chip::{ChipDatabase, ChipDescriptor};
use rupdi_core::memory::FUSES_LEN;
use rupdi_core::{Error, Target};

/// Print signature, serial number, supply voltage and fuses of the target
pub fn run_info(
    target: &mut dyn Target,
    chip: &ChipDescriptor,
    db: &ChipDatabase,
) -> Result<(), Box<dyn std::error::Error>> {
    let sig = target.device_signature()?;
    let detected = db.find_by_signature(&sig);

    println!("Target Information");
    println!("==================");
    println!();
    println!("Selected chip:   {} ({})", chip.name, chip.family);
    println!("Signature:       {:02X} {:02X} {:02X}", sig[0], sig[1], sig[2]);
    match detected {
        Some(found) if found.name == chip.name => println!("Detected:        {} (match)", found.name),
        Some(found) => {
            println!("Detected:        {} (does not match --chip)", found.name);
            log::warn!("Target reports {} but {} was selected", found.name, chip.name);
        }
        None => println!("Detected:        unknown part"),
    }

    let serial = target.device_serial_number()?;
    let serial_hex: Vec<String> = serial.iter().map(|b| format!("{:02X}", b)).collect();
    println!("Serial number:   {}", serial_hex.join(" "));

    match target.target_voltage() {
        Ok(v) => println!("Target voltage:  {:.2} V", v),
        Err(Error::Unsupported(_)) => {}
        Err(e) => return Err(e.into()),
    }

    println!();
    println!(
        "Flash:           {} KiB ({} byte pages)",
        chip.flash_kib(),
        chip.flash_page_size
    );
    println!(
        "EEPROM:          {} bytes ({} byte pages)",
        chip.eeprom_size, chip.eeprom_page_size
    );
    println!("User row:        {} bytes", chip.user_row_size());
    println!("SRAM:            {} bytes", chip.sram_size);

    let offsets: Vec<u8> = (0..FUSES_LEN as u8).collect();
    let fuses = target.read_fuses(&offsets)?;
    let fuse_hex: Vec<String> = fuses.iter().map(|b| format!("{:02X}", b)).collect();
    println!("Fuses:           {}", fuse_hex.join(" "));

    Ok(())
}
