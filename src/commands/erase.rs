//! Erase command

use rupdi_core::{EraseMode, Target};

/// Erase with `mode`; `address` only matters for the page modes
pub fn run_erase(
    target: &mut dyn Target,
    mode: EraseMode,
    address: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let paged = matches!(
        mode,
        EraseMode::AppPage | EraseMode::BootPage | EraseMode::EepromPage
    );
    let address = if paged { address } else { 0 };

    log::info!("Erasing {} at 0x{:X}", mode.name(), address);
    target.erase_target(address, mode)?;
    if paged {
        println!("Erased {} page at 0x{:X}", mode.name(), address);
    } else {
        println!("Erased {}", mode.name());
    }
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use rupdi_core::chip::ChipDatabase;
    use rupdi_dummy::{DummyConfig, DummyTarget};

    #[test]
    fn test_chip_erase_ignores_address() {
        let db = ChipDatabase::builtin().unwrap();
        let chip = db.find("ATtiny817").unwrap().clone();
        let mut target = DummyTarget::with_flash(chip, DummyConfig::default(), &[0u8; 128]);
        run_erase(&mut target, EraseMode::Chip, 0x40).unwrap();
        assert!(target.flash()[..128].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_page_erase() {
        let db = ChipDatabase::builtin().unwrap();
        let chip = db.find("ATtiny817").unwrap().clone();
        let mut target = DummyTarget::with_flash(chip, DummyConfig::default(), &[0u8; 128]);
        run_erase(&mut target, EraseMode::AppPage, 0x40).unwrap();
        assert!(target.flash()[..0x40].iter().all(|&b| b == 0x00));
        assert!(target.flash()[0x40..0x80].iter().all(|&b| b == 0xFF));
    }
}
