//! Memory segments and tinyAVR-0/1 address map
//!
//! AVR8 memory-type codes are what the probe expects in MEMORY_READ /
//! MEMORY_WRITE commands. The base addresses are the data-space locations of
//! each segment on the UPDI tinyAVR family.

/// AVR8 memory type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemType {
    /// Data space (SRAM and I/O)
    Sram = 0x20,
    /// EEPROM, byte addressed
    Eeprom = 0x22,
    /// Flash, page granularity
    FlashPage = 0xB0,
    /// EEPROM, page granularity
    EepromPage = 0xB1,
    /// Fuse bytes
    Fuses = 0xB2,
    /// Lock bits
    LockBits = 0xB3,
    /// Device signature row
    Signature = 0xB4,
    /// Register file
    Regfile = 0xB8,
    /// Application flash
    ApplFlash = 0xC0,
    /// Boot flash
    BootFlash = 0xC1,
    /// Application flash, atomic page write
    ApplFlashAtomic = 0xC2,
    /// Boot flash, atomic page write
    BootFlashAtomic = 0xC3,
    /// EEPROM, atomic page write
    EepromAtomic = 0xC4,
    /// User signature row
    UserSignature = 0xC5,
    /// Production calibration row
    CalibrationSignature = 0xC6,
}

impl MemType {
    /// Protocol code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a memory type by protocol code
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x20 => MemType::Sram,
            0x22 => MemType::Eeprom,
            0xB0 => MemType::FlashPage,
            0xB1 => MemType::EepromPage,
            0xB2 => MemType::Fuses,
            0xB3 => MemType::LockBits,
            0xB4 => MemType::Signature,
            0xB8 => MemType::Regfile,
            0xC0 => MemType::ApplFlash,
            0xC1 => MemType::BootFlash,
            0xC2 => MemType::ApplFlashAtomic,
            0xC3 => MemType::BootFlashAtomic,
            0xC4 => MemType::EepromAtomic,
            0xC5 => MemType::UserSignature,
            0xC6 => MemType::CalibrationSignature,
            _ => return None,
        })
    }

    /// Symbolic name used in command traces
    pub fn name(self) -> &'static str {
        match self {
            MemType::Sram => "MEMTYPE_SRAM",
            MemType::Eeprom => "MEMTYPE_EEPROM",
            MemType::FlashPage => "MEMTYPE_FLASH_PAGE",
            MemType::EepromPage => "MEMTYPE_EEPROM_PAGE",
            MemType::Fuses => "MEMTYPE_FUSES",
            MemType::LockBits => "MEMTYPE_LOCK_BITS",
            MemType::Signature => "MEMTYPE_SIGNATURE",
            MemType::Regfile => "MEMTYPE_REGFILE",
            MemType::ApplFlash => "MEMTYPE_APPL_FLASH",
            MemType::BootFlash => "MEMTYPE_BOOT_FLASH",
            MemType::ApplFlashAtomic => "MEMTYPE_APPL_FLASH_ATOMIC",
            MemType::BootFlashAtomic => "MEMTYPE_BOOT_FLASH_ATOMIC",
            MemType::EepromAtomic => "MEMTYPE_EEPROM_ATOMIC",
            MemType::UserSignature => "MEMTYPE_USER_SIGNATURE",
            MemType::CalibrationSignature => "MEMTYPE_CALIBRATION_SIGNATURE",
        }
    }
}

/// Name of a raw memory-type code, `"MEMTYPE_0xNN"` when unknown
pub fn memtype_name(code: u8) -> String {
    match MemType::from_code(code) {
        Some(m) => m.name().to_string(),
        None => format!("MEMTYPE_0x{:02X}", code),
    }
}

/// Device signature (3 bytes)
pub const SIGNATURE_BASE: u32 = 0x1100;
/// Device serial number (13 bytes)
pub const SERIAL_NUMBER_BASE: u32 = 0x1103;
/// Length of the serial number
pub const SERIAL_NUMBER_LEN: usize = 13;
/// Fuse bytes
pub const FUSES_BASE: u32 = 0x1280;
/// Number of fuse bytes, lock byte included
pub const FUSES_LEN: usize = 11;
/// Lock bits
pub const LOCKBITS_BASE: u32 = 0x128A;
/// User row
pub const USERROW_BASE: u32 = 0x1300;
/// EEPROM as mapped in data space
pub const EEPROM_BASE: u32 = 0x1400;
/// Flash as mapped in data space
pub const FLASH_MAPPED_BASE: u32 = 0x8000;
/// Stack pointer I/O register
pub const SP_ADDRESS: u32 = 0x3D;
/// Status register I/O register
pub const SREG_ADDRESS: u32 = 0x3F;

/// Erase modes accepted by `Target::erase_target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EraseMode {
    /// Whole chip
    Chip = 0,
    /// Application section
    App = 1,
    /// Boot section
    Boot = 2,
    /// Whole EEPROM
    Eeprom = 3,
    /// One application page
    AppPage = 4,
    /// One boot page
    BootPage = 5,
    /// One EEPROM page
    EepromPage = 6,
    /// User signature row
    UserSignature = 7,
}

impl EraseMode {
    /// Look up an erase mode by its numeric value
    pub fn from_value(v: u8) -> Option<Self> {
        Some(match v {
            0 => EraseMode::Chip,
            1 => EraseMode::App,
            2 => EraseMode::Boot,
            3 => EraseMode::Eeprom,
            4 => EraseMode::AppPage,
            5 => EraseMode::BootPage,
            6 => EraseMode::EepromPage,
            7 => EraseMode::UserSignature,
            _ => return None,
        })
    }

    /// Symbolic name used in command traces
    pub fn name(self) -> &'static str {
        match self {
            EraseMode::Chip => "CHIP",
            EraseMode::App => "APP",
            EraseMode::Boot => "BOOT",
            EraseMode::Eeprom => "EEPROM",
            EraseMode::AppPage => "APP_PAGE",
            EraseMode::BootPage => "BOOT_PAGE",
            EraseMode::EepromPage => "EEPROM_PAGE",
            EraseMode::UserSignature => "USERSIG",
        }
    }
}
