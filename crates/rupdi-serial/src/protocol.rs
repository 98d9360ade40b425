//! UPDI instruction set constants and encoders
//!
//! Every instruction starts with the SYNC character followed by an opcode
//! byte. The top three bits of the opcode select the instruction; the low
//! bits carry the pointer mode or address width and the data width.
//! Multi-byte operands are little endian.

use bitflags::bitflags;

/// Synchronisation character opening every instruction
pub const SYNC: u8 = 0x55;
/// Acknowledge returned after stores
pub const ACK: u8 = 0x40;

// Instruction opcodes (bits 7:5)
/// Load from data space, direct addressing
pub const LDS: u8 = 0x00;
/// Load from data space, indirect addressing
pub const LD: u8 = 0x20;
/// Store to data space, direct addressing
pub const STS: u8 = 0x40;
/// Store to data space, indirect addressing
pub const ST: u8 = 0x60;
/// Load from control/status space
pub const LDCS: u8 = 0x80;
/// Repeat the following instruction
pub const REPEAT: u8 = 0xA0;
/// Store to control/status space
pub const STCS: u8 = 0xC0;
/// Send a key or read the system information block
pub const KEY: u8 = 0xE0;

/// Mask selecting the instruction from an opcode byte
pub const OPCODE_MASK: u8 = 0xE0;

/// KEY size field: 64-bit key
pub const KEY_64: u8 = 0x00;
/// KEY size field: 128-bit SIB
pub const KEY_128: u8 = 0x01;
/// KEY flag: read the system information block instead of sending a key
pub const KEY_SIB: u8 = 0x04;

/// Length of a key in bytes
pub const KEY_LEN: usize = 8;
/// Length of the system information block read with KEY_128
pub const SIB_LEN: usize = 16;

// Keys, least significant byte first as they go on the wire
/// "NVMErase"
pub const KEY_CHIP_ERASE: [u8; KEY_LEN] = [0x65, 0x73, 0x61, 0x72, 0x45, 0x4D, 0x56, 0x4E];
/// "NVMProg "
pub const KEY_NVM_PROG: [u8; KEY_LEN] = [0x20, 0x67, 0x6F, 0x72, 0x50, 0x4D, 0x56, 0x4E];
/// "NVMUs&te"
pub const KEY_USER_ROW: [u8; KEY_LEN] = [0x65, 0x74, 0x26, 0x73, 0x55, 0x4D, 0x56, 0x4E];
/// "OCD     "
pub const KEY_OCD: [u8; KEY_LEN] = [0x20, 0x20, 0x20, 0x20, 0x20, 0x44, 0x43, 0x4F];

// Control/status registers
/// UPDI revision
pub const CS_STATUSA: u8 = 0x00;
/// Protocol error signature
pub const CS_STATUSB: u8 = 0x01;
/// Guard time, inter-byte delay, parity and collision settings
pub const CS_CTRLA: u8 = 0x02;
/// Disable bits
pub const CS_CTRLB: u8 = 0x03;
/// Key status
pub const CS_ASI_KEY_STATUS: u8 = 0x07;
/// Reset request
pub const CS_ASI_RESET_REQ: u8 = 0x08;
/// UPDI clock selection
pub const CS_ASI_CTRLA: u8 = 0x09;
/// System control
pub const CS_ASI_SYS_CTRLA: u8 = 0x0A;
/// System status
pub const CS_ASI_SYS_STATUS: u8 = 0x0B;
/// CRC status
pub const CS_ASI_CRC_STATUS: u8 = 0x0C;

/// Value written to ASI_RESET_REQ to hold the core in reset
pub const RESET_SIGNATURE: u8 = 0x59;

/// Names of the sixteen control/status registers
pub const CS_REGISTER_NAMES: [&str; 16] = [
    "STATUSA",
    "STATUSB",
    "CTRLA",
    "CTRLB",
    "Reserved_4",
    "Reserved_5",
    "Reserved_6",
    "ASI_KEY_STATUS",
    "ASI_RESET_REQ",
    "ASI_CTRLA",
    "ASI_SYS_CTRLA",
    "ASI_SYS_STATUS",
    "ASI_CRC_STATUS",
    "Reserved_D",
    "Reserved_E",
    "Reserved_F",
];

/// Mask of the error signature in STATUSB
pub const STATUSB_PESIG: u8 = 0x07;

/// Readable name of a STATUSB error signature
pub fn pesig_name(code: u8) -> &'static str {
    match code & STATUSB_PESIG {
        0 => "No error",
        1 => "Parity error",
        2 => "Frame error",
        3 => "Access Layer Timeout Error",
        4 => "Clock recovery error",
        7 => "Contention error",
        _ => "Reserved",
    }
}

bitflags! {
    /// UPDI CTRLA bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtrlA: u8 {
        /// Inter-byte delay enable
        const IBDLY = 0x80;
        /// Parity disable
        const PARD = 0x20;
        /// Disable time-out detection
        const DTD = 0x10;
        /// Response signature disable
        const RSD = 0x08;
    }
}

bitflags! {
    /// UPDI CTRLB bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtrlB: u8 {
        /// Disable acknowledge responses
        const NACKDIS = 0x10;
        /// Collision and contention detection disable
        const CCDETDIS = 0x08;
        /// Disable the UPDI interface
        const UPDIDIS = 0x04;
    }
}

bitflags! {
    /// ASI_KEY_STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyStatus: u8 {
        /// User row write key accepted
        const UROWWRITE = 0x20;
        /// NVM programming key accepted
        const NVMPROG = 0x10;
        /// Chip erase key accepted
        const CHIPERASE = 0x08;
    }
}

bitflags! {
    /// ASI_SYS_CTRLA bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SysCtrlA: u8 {
        /// Finalise a user row write
        const UROWWRITE_FINAL = 0x02;
        /// Request the system clock
        const CLKREQ = 0x01;
    }
}

bitflags! {
    /// ASI_SYS_STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SysStatus: u8 {
        /// System reset active
        const RSTSYS = 0x20;
        /// Core is sleeping
        const INSLEEP = 0x10;
        /// NVM programming mode active
        const NVMPROG = 0x08;
        /// User row programming active
        const UROWPROG = 0x04;
        /// Device is locked
        const LOCKSTATUS = 0x01;
    }
}

bitflags! {
    /// NVMCTRL STATUS bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NvmStatus: u8 {
        /// Last write failed
        const WRERROR = 0x04;
        /// EEPROM busy
        const EEBUSY = 0x02;
        /// Flash busy
        const FBUSY = 0x01;
    }
}

// NVMCTRL register offsets from the peripheral base
/// Command register
pub const NVMCTRL_CTRLA: u16 = 0x00;
/// Control B
pub const NVMCTRL_CTRLB: u16 = 0x01;
/// Status
pub const NVMCTRL_STATUS: u16 = 0x02;
/// Interrupt control
pub const NVMCTRL_INTCTRL: u16 = 0x03;
/// Interrupt flags
pub const NVMCTRL_INTFLAGS: u16 = 0x04;
/// Data low byte
pub const NVMCTRL_DATAL: u16 = 0x06;
/// Data high byte
pub const NVMCTRL_DATAH: u16 = 0x07;
/// Address low byte
pub const NVMCTRL_ADDRL: u16 = 0x08;
/// Address high byte
pub const NVMCTRL_ADDRH: u16 = 0x09;

/// NVMCTRL CTRLA commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NvmCommand {
    /// No command
    None = 0x00,
    /// Write page buffer
    WritePage = 0x01,
    /// Erase page
    ErasePage = 0x02,
    /// Erase and write page
    EraseWritePage = 0x03,
    /// Clear the page buffer
    PageBufferClear = 0x04,
    /// Erase flash and EEPROM
    ChipErase = 0x05,
    /// Erase EEPROM
    EepromErase = 0x06,
    /// Write the fuse at ADDR with DATAL
    WriteFuse = 0x07,
}

/// Pointer access modes of LD and ST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PtrMode {
    /// `*(ptr)`
    Deref = 0,
    /// `*(ptr++)`
    PostInc = 1,
    /// The pointer register itself
    Pointer = 2,
}

impl PtrMode {
    /// Operand notation used in traces
    pub fn name(self) -> &'static str {
        match self {
            PtrMode::Deref => "*(ptr)",
            PtrMode::PostInc => "*(ptr++)",
            PtrMode::Pointer => "ptr",
        }
    }
}

/// Width of a data operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataSize {
    /// 8 bits
    Byte = 0,
    /// 16 bits
    Word = 1,
}

impl DataSize {
    /// Operand length in bytes
    pub fn len(self) -> usize {
        match self {
            DataSize::Byte => 1,
            DataSize::Word => 2,
        }
    }

    /// Data size holding `len` bytes
    pub fn for_len(len: usize) -> Option<Self> {
        match len {
            1 => Some(DataSize::Byte),
            2 => Some(DataSize::Word),
            _ => None,
        }
    }
}

/// Instruction class of an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Direct load
    Lds,
    /// Indirect load
    Ld,
    /// Direct store
    Sts,
    /// Indirect store
    St,
    /// Control/status load
    Ldcs,
    /// Repeat
    Repeat,
    /// Control/status store
    Stcs,
    /// Key or SIB
    Key,
}

impl Opcode {
    /// Classify an opcode byte
    pub fn from_byte(code: u8) -> Self {
        match code & OPCODE_MASK {
            LDS => Opcode::Lds,
            LD => Opcode::Ld,
            STS => Opcode::Sts,
            ST => Opcode::St,
            LDCS => Opcode::Ldcs,
            REPEAT => Opcode::Repeat,
            STCS => Opcode::Stcs,
            _ => Opcode::Key,
        }
    }
}

/// Address width field of LDS/STS: 16-bit addresses
const ADDRESS_16: u8 = 0x01;

/// `LDS` with a 16-bit address; `size` bytes follow from the target
pub fn lds(address: u16, size: DataSize) -> [u8; 4] {
    let [lo, hi] = address.to_le_bytes();
    [SYNC, LDS | (ADDRESS_16 << 2) | size as u8, lo, hi]
}

/// `STS` address phase with a 16-bit address; the target ACKs, then the
/// data phase follows
pub fn sts(address: u16, size: DataSize) -> [u8; 4] {
    let [lo, hi] = address.to_le_bytes();
    [SYNC, STS | (ADDRESS_16 << 2) | size as u8, lo, hi]
}

/// `LD` through the pointer register
pub fn ld(ptr: PtrMode, size: DataSize) -> [u8; 2] {
    [SYNC, LD | ((ptr as u8) << 2) | size as u8]
}

/// `ST` through the pointer register with its first operand
pub fn st(ptr: PtrMode, data: &[u8]) -> Vec<u8> {
    let size = if data.len() == 2 {
        DataSize::Word
    } else {
        DataSize::Byte
    };
    let mut out = vec![SYNC, ST | ((ptr as u8) << 2) | size as u8];
    out.extend_from_slice(data);
    out
}

/// `LDCS` of a control/status register
pub fn ldcs(register: u8) -> [u8; 2] {
    [SYNC, LDCS | (register & 0x0F)]
}

/// `STCS` of a control/status register
pub fn stcs(register: u8, value: u8) -> [u8; 3] {
    [SYNC, STCS | (register & 0x0F), value]
}

/// `REPEAT`: the next instruction runs `count + 1` times
pub fn repeat(count: u8) -> [u8; 3] {
    [SYNC, REPEAT, count]
}

/// `KEY` with a 64-bit key
pub fn key(key: &[u8; KEY_LEN]) -> Vec<u8> {
    let mut out = vec![SYNC, KEY | KEY_64];
    out.extend_from_slice(key);
    out
}

/// `KEY` request for the 16-byte system information block
pub fn read_sib() -> [u8; 2] {
    [SYNC, KEY | KEY_SIB | KEY_128]
}
