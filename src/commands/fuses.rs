//! Fuse commands

use rupdi_core::memory::FUSES_LEN;
use rupdi_core::Target;

/// tinyAVR-0/1 fuse names by offset; `None` marks reserved bytes
const FUSE_NAMES: [Option<&str>; FUSES_LEN] = [
    Some("WDTCFG"),
    Some("BODCFG"),
    Some("OSCCFG"),
    None,
    Some("TCD0CFG"),
    Some("SYSCFG0"),
    Some("SYSCFG1"),
    Some("APPEND"),
    Some("BOOTEND"),
    None,
    Some("LOCKBIT"),
];

fn fuse_name(offset: u8) -> &'static str {
    FUSE_NAMES
        .get(offset as usize)
        .copied()
        .flatten()
        .unwrap_or("reserved")
}

/// Print every fuse byte with its name
pub fn run_read_fuses(target: &mut dyn Target) -> Result<(), Box<dyn std::error::Error>> {
    let offsets: Vec<u8> = (0..FUSES_LEN as u8).collect();
    let values = target.read_fuses(&offsets)?;

    println!("Fuses");
    println!("=====");
    for (offset, value) in offsets.iter().zip(&values) {
        println!("  {:2}  {:<8} 0x{:02X}", offset, fuse_name(*offset), value);
    }
    Ok(())
}

/// Write `(offset, value)` pairs and read them back
pub fn run_write_fuses(
    target: &mut dyn Target,
    fuses: &[(u8, u8)],
) -> Result<(), Box<dyn std::error::Error>> {
    let (offsets, values): (Vec<u8>, Vec<u8>) = fuses.iter().copied().unzip();
    target.write_fuses(&offsets, &values)?;

    let readback = target.read_fuses(&offsets)?;
    for ((offset, want), got) in offsets.iter().zip(&values).zip(&readback) {
        if want != got {
            return Err(format!(
                "Fuse {} ({}) reads 0x{:02X} after writing 0x{:02X}",
                offset,
                fuse_name(*offset),
                got,
                want
            )
            .into());
        }
        println!("  {} ({}) = 0x{:02X}", offset, fuse_name(*offset), got);
    }
    println!("Wrote {} fuse(s)", fuses.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuse_names() {
        assert_eq!(fuse_name(2), "OSCCFG");
        assert_eq!(fuse_name(3), "reserved");
        assert_eq!(fuse_name(10), "LOCKBIT");
        assert_eq!(fuse_name(42), "reserved");
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_write_fuses_reads_back() {
        use rupdi_core::chip::ChipDatabase;
        use rupdi_dummy::{DummyConfig, DummyTarget};

        let db = ChipDatabase::builtin().unwrap();
        let chip = db.find("ATtiny817").unwrap().clone();
        let mut target = DummyTarget::new(chip, DummyConfig::default());
        run_write_fuses(&mut target, &[(2, 0x01), (5, 0xF7)]).unwrap();
        assert_eq!(target.read_fuses(&[2, 5]).unwrap(), vec![0x01, 0xF7]);
        run_read_fuses(&mut target).unwrap();
    }
}
