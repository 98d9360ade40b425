//! Target chip descriptor

/// Memory geometry and peripheral bases of one UPDI target part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipDescriptor {
    /// Family name (e.g. "tinyAVR")
    pub family: String,
    /// Part name (e.g. "ATtiny817")
    pub name: String,
    /// Three signature bytes as read from the signature row
    pub signature: [u8; 3],
    /// Flash size in bytes
    pub flash_size: u32,
    /// Flash page size in bytes
    pub flash_page_size: u16,
    /// SRAM size in bytes
    pub sram_size: u32,
    /// EEPROM size in bytes
    pub eeprom_size: u32,
    /// EEPROM page size in bytes
    pub eeprom_page_size: u8,
    /// Start of flash in the data-space map
    pub prog_base: u32,
    /// NVMCTRL peripheral base
    pub nvm_base: u16,
    /// On-chip debug module base
    pub ocd_base: u16,
}

impl ChipDescriptor {
    /// Check whether the descriptor matches a signature read from a target
    pub fn matches_signature(&self, signature: &[u8]) -> bool {
        signature.len() >= 3 && self.signature[..] == signature[..3]
    }

    /// Flash size in KiB
    pub fn flash_kib(&self) -> u32 {
        self.flash_size / 1024
    }

    /// User row size in bytes; one EEPROM page on this family
    pub fn user_row_size(&self) -> u32 {
        self.eeprom_page_size as u32
    }
}
