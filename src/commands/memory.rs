//! Read, write and verify for the byte-addressed memories

use rupdi_core::chip::ChipDescriptor;
use rupdi_core::Target;
use std::fs;
use std::path::Path;

/// A memory segment the CLI can dump and program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Flash,
    Eeprom,
    UserRow,
}

impl Segment {
    pub fn name(self) -> &'static str {
        match self {
            Segment::Flash => "flash",
            Segment::Eeprom => "EEPROM",
            Segment::UserRow => "user row",
        }
    }

    /// Segment size in bytes for `chip`
    pub fn size(self, chip: &ChipDescriptor) -> u32 {
        match self {
            Segment::Flash => chip.flash_size,
            Segment::Eeprom => chip.eeprom_size,
            Segment::UserRow => chip.user_row_size(),
        }
    }

    fn read(self, target: &mut dyn Target, address: u32, len: usize) -> rupdi_core::Result<Vec<u8>> {
        match self {
            Segment::Flash => target.read_flash(address, len),
            Segment::Eeprom => target.read_eeprom(address, len),
            Segment::UserRow => target.read_user_row(address, len),
        }
    }

    fn write(self, target: &mut dyn Target, address: u32, data: &[u8]) -> rupdi_core::Result<()> {
        match self {
            Segment::Flash => target.write_flash(address, data),
            Segment::Eeprom => target.write_eeprom(address, data),
            Segment::UserRow => target.write_user_row(address, data),
        }
    }
}

/// Read file contents into a Vec
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let data = fs::read(path)?;
    println!("Read {} bytes from {:?}", data.len(), path);
    Ok(data)
}

/// First differing offset and byte pair between two buffers
fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<(usize, u8, u8)> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|i| (i, expected[i], actual[i]))
}

/// Dump `length` bytes (default: rest of the segment) starting at `address`
pub fn run_read(
    target: &mut dyn Target,
    chip: &ChipDescriptor,
    segment: Segment,
    output: &Path,
    address: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let size = segment.size(chip);
    if address >= size {
        return Err(format!(
            "Start 0x{:X} is outside {} ({} bytes)",
            address,
            segment.name(),
            size
        )
        .into());
    }
    let len = length.unwrap_or(size - address) as usize;

    let data = segment.read(target, address, len)?;
    fs::write(output, &data)?;
    println!("Wrote {} bytes of {} to {:?}", data.len(), segment.name(), output);
    Ok(())
}

/// Program a file into `segment` at `address`, optionally reading it back
pub fn run_write(
    target: &mut dyn Target,
    chip: &ChipDescriptor,
    segment: Segment,
    input: &Path,
    address: u32,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_file(input)?;
    let size = segment.size(chip);
    if address as u64 + data.len() as u64 > size as u64 {
        return Err(format!(
            "File size ({} bytes) at 0x{:X} exceeds {} size ({} bytes)",
            data.len(),
            address,
            segment.name(),
            size
        )
        .into());
    }
    if data.is_empty() {
        println!("Nothing to write");
        return Ok(());
    }

    segment.write(target, address, &data)?;
    println!("Wrote {} bytes to {}", data.len(), segment.name());

    if verify {
        run_verify(target, segment, address, &data)?;
    }
    Ok(())
}

/// Read back `expected.len()` bytes at `address` and compare
pub fn run_verify(
    target: &mut dyn Target,
    segment: Segment,
    address: u32,
    expected: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let actual = segment.read(target, address, expected.len())?;
    if let Some((offset, want, got)) = first_mismatch(expected, &actual) {
        let count = expected.iter().zip(&actual).filter(|(e, a)| e != a).count();
        return Err(format!(
            "Verification failed: {} byte(s) differ, first at 0x{:X} (expected 0x{:02X}, got 0x{:02X})",
            count,
            address as usize + offset,
            want,
            got
        )
        .into());
    }
    println!("Verification passed!");
    Ok(())
}
